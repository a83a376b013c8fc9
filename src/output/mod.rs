//! Output paths and the multiplexer that switches between them.
//!
//! - [`PortOutputStream`] sends to one destination owned by someone else
//! - [`VirtualOutputStream`] sends through a source we host
//! - [`CombinationOutputStream`] keeps exactly one of them active

mod combination;
mod port;
mod virtual_output;

pub use combination::{CombinationOutputStream, OutputEvent};
pub use port::PortOutputStream;
pub use virtual_output::VirtualOutputStream;

use crate::driver::DEFAULT_SYSEX_BUFFER_SIZE;

/// Settings the multiplexer keeps for the port path, since that path is
/// rebuilt every time the destination changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    /// Send immediately rather than at each message's timestamp.
    pub ignores_timestamps: bool,
    /// Allow paced, asynchronous SysEx sends.
    pub sends_sysex_async: bool,
    pub custom_buffer_size: Option<usize>,
}

impl OutputOptions {
    pub fn buffer_size(&self) -> usize {
        self.custom_buffer_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_SYSEX_BUFFER_SIZE)
    }
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            ignores_timestamps: true,
            sends_sysex_async: true,
            custom_buffer_size: None,
        }
    }
}
