use crate::endpoint::{InputSource, OutputDestination, SourceGroup};
use crate::message::TimedMessage;
use std::collections::HashSet;

pub fn print_source_groups(groups: &[SourceGroup], selected: &HashSet<InputSource>) {
    for group in groups {
        println!("{}:", group.name);
        if group.sources.is_empty() {
            println!("    (none)");
        }
        for source in &group.sources {
            let mark = if selected.contains(source) { "*" } else { " " };
            println!("  {} {}", mark, source);
        }
    }
}

pub fn format_destination(destination: &OutputDestination, selected: bool) -> String {
    let mark = if selected { "*" } else { " " };
    match destination {
        OutputDestination::Port(endpoint) => format!("  {} {} ({})", mark, endpoint.name, endpoint.id),
        OutputDestination::Virtual => format!("  {} {}", mark, destination.name()),
    }
}

pub fn print_destinations(destinations: &[OutputDestination], selected: Option<&OutputDestination>) {
    println!("Destinations:");
    for destination in destinations {
        println!(
            "{}",
            format_destination(destination, selected == Some(destination))
        );
    }
}

/// Timestamp in milliseconds, then the message.
pub fn format_message(message: &TimedMessage) -> String {
    format!(
        "{:>10}.{:03}  {}",
        message.timestamp / 1000,
        message.timestamp % 1000,
        message.message
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::message::MidiMessage;

    #[test]
    fn test_format_destination() {
        let synth = OutputDestination::Port(Endpoint::new(3, "Synth"));
        assert_eq!(format_destination(&synth, true), "  * Synth (#3)");
        assert!(format_destination(&OutputDestination::Virtual, false).starts_with("    "));
    }

    #[test]
    fn test_format_message() {
        let message = TimedMessage::new(12_345, MidiMessage::Start);
        assert_eq!(format_message(&message), "        12.345  Start");
    }
}
