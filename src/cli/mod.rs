use crate::config::EngineConfig;
use crate::endpoint::{InputSource, OutputDestination};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Read engine settings from this file (TOML or JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Also log to the terminal
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List sources and destinations
    List,

    /// Print incoming messages
    Monitor {
        /// Listen to sources whose name contains NAME
        #[arg(long = "source", value_name = "NAME")]
        sources: Vec<String>,

        /// Listen to every source
        #[arg(long, conflicts_with = "sources")]
        all: bool,
    },

    /// Record SysEx messages into a .syx file
    Receive {
        /// Keep recording until Enter is pressed
        #[arg(long)]
        multiple: bool,

        /// Where to write the messages
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Give up on a partial message after this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,
    },

    /// Send the SysEx messages in a .syx file
    Send {
        file: PathBuf,

        /// Send to the destination whose name contains NAME
        #[arg(long, value_name = "NAME", conflicts_with = "virtual_source")]
        destination: Option<String>,

        /// Send through our own virtual source instead
        #[arg(long = "virtual")]
        virtual_source: bool,

        /// Milliseconds to wait between messages
        #[arg(long, value_name = "MS")]
        pause: Option<u64>,

        /// Bytes per chunk when sending
        #[arg(long, value_name = "BYTES")]
        buffer_size: Option<usize>,

        /// Send everything at once, without pacing
        #[arg(long)]
        no_pacing: bool,
    },
}

impl Args {
    /// Command line flags win over the loaded configuration.
    pub fn apply_overrides(&self, config: &mut EngineConfig) {
        match &self.command {
            Command::Receive {
                timeout: Some(timeout),
                ..
            } => config.sysex_timeout_ms = *timeout,
            Command::Send {
                pause,
                buffer_size,
                no_pacing,
                ..
            } => {
                if let Some(pause) = pause {
                    config.pause_between_messages_ms = *pause;
                }
                if buffer_size.is_some() {
                    config.custom_buffer_size = *buffer_size;
                }
                if *no_pacing {
                    config.sends_sysex_async = false;
                }
            }
            _ => {}
        }
    }
}

/// Finds the sources whose names contain each of `wanted`.
pub fn validate_sources(
    wanted: &[String],
    offered: &HashSet<InputSource>,
) -> Result<HashSet<InputSource>, String> {
    let mut selected = HashSet::new();
    for name in wanted {
        let matches: Vec<&InputSource> = offered
            .iter()
            .filter(|source| source.name.contains(name.as_str()))
            .collect();
        if matches.is_empty() {
            let mut error_msg = format!("Error: Source '{}' not found in available sources:\n", name);
            let mut names: Vec<&str> = offered.iter().map(|s| s.name.as_str()).collect();
            names.sort_unstable();
            for available in names {
                error_msg.push_str(&format!("  - {}\n", available));
            }
            return Err(error_msg);
        }
        selected.extend(matches.into_iter().cloned());
    }
    Ok(selected)
}

/// Finds the first port destination whose name contains `name`.
pub fn validate_destination(
    name: &str,
    destinations: &[OutputDestination],
) -> Result<OutputDestination, String> {
    destinations
        .iter()
        .find(|d| matches!(d, OutputDestination::Port(endpoint) if endpoint.name.contains(name)))
        .cloned()
        .ok_or_else(|| {
            let mut error_msg = format!(
                "Error: Destination '{}' not found in available destinations:\n",
                name
            );
            for destination in destinations {
                error_msg.push_str(&format!("  - {}\n", destination));
            }
            error_msg
        })
}
