//! Terminal output for the command line tool
//!
//! - Spinner for SysEx being received
//! - Progress bar for SysEx being sent
//! - Plain-text listings of sources, destinations and messages
//!
//! Progress display is built on indicatif.

mod listing;
mod progress;

pub use listing::{format_destination, format_message, print_destinations, print_source_groups};
pub use progress::{
    create_receive_spinner, create_send_progress, receive_message, send_message,
    update_receive_spinner, update_send_progress,
};
