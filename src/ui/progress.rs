use crate::sysex::{ReceiveProgress, SendProgress};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn create_receive_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap(),
    );
    pb.set_prefix("Receive");
    pb.set_message("Waiting for SysEx...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn update_receive_spinner(pb: &ProgressBar, progress: &ReceiveProgress) {
    pb.set_message(receive_message(progress));
}

pub fn receive_message(progress: &ReceiveProgress) -> String {
    let mut message = format!(
        "{} messages, {}",
        progress.message_count,
        HumanBytes(progress.total_bytes_read as u64)
    );
    if progress.current_bytes_read > 0 {
        message.push_str(&format!(
            " (reading {})",
            HumanBytes(progress.current_bytes_read as u64)
        ));
    }
    message
}

pub fn create_send_progress(bytes_to_send: usize) -> ProgressBar {
    let pb = ProgressBar::new(bytes_to_send as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("█▊ "),
    );
    pb.set_prefix("Send");
    pb
}

pub fn update_send_progress(pb: &ProgressBar, progress: &SendProgress) {
    pb.set_position(progress.bytes_sent as u64);
    pb.set_message(send_message(progress));
}

pub fn send_message(progress: &SendProgress) -> String {
    if progress.message_count == 0 {
        return String::new();
    }
    format!(
        "message {}/{}",
        progress.message_index + 1,
        progress.message_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_message() {
        let progress = ReceiveProgress {
            message_count: 2,
            current_bytes_read: 0,
            total_bytes_read: 10,
        };
        assert_eq!(receive_message(&progress), "2 messages, 10 B");
    }

    #[test]
    fn test_send_message_counts_from_one() {
        let progress = SendProgress {
            message_count: 3,
            message_index: 0,
            bytes_to_send: 30,
            bytes_sent: 5,
        };
        assert_eq!(send_message(&progress), "message 1/3");
        assert_eq!(send_message(&SendProgress::default()), "");
    }
}
