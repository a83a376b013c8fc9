//! MIDI transport drivers
//!
//! The rest of the crate talks to the platform only through [`MidiDriver`]:
//! - enumeration of sources and destinations
//! - connections to sources (and, where supported, spy taps on destinations)
//! - our own virtual endpoints
//! - synchronous sends and paced asynchronous SysEx sends
//!
//! Everything the driver learns asynchronously (packets, endpoint churn,
//! send progress) arrives as [`DriverEvent`]s on a crossbeam channel, so the
//! owning thread can apply them one at a time.
//!
//! - [`MidirDriver`] talks to real hardware through midir
//! - [`MockDriver`] is scripted by tests

pub mod midir_driver;
pub mod mock;

use crate::endpoint::{Endpoint, EndpointId};
use crate::error::Result;

pub use midir_driver::MidirDriver;
pub use mock::{MockDriver, MockHandle};

/// Identifies one live connection; every packet carries the token of the
/// connection it arrived on. Tokens are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionToken(pub u64);

/// Identifies one asynchronous SysEx send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendRequestId(pub u64);

/// Asynchronous notifications from a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Packet {
        token: ConnectionToken,
        timestamp: u64,
        data: Vec<u8>,
    },
    /// The set of sources or destinations changed.
    EndpointsChanged,
    EndpointDisappeared {
        endpoint: EndpointId,
    },
    /// An endpoint went away and came back under a new handle, e.g. after
    /// a driver reload.
    EndpointReplaced {
        old: EndpointId,
        new: EndpointId,
    },
    SysExSendProgress {
        request: SendRequestId,
        bytes_sent: usize,
    },
    SysExSendFinished {
        request: SendRequestId,
        bytes_sent: usize,
        all_bytes_sent: bool,
    },
}

/// Bytes handed to the driver per chunk when no custom size is configured.
pub const DEFAULT_SYSEX_BUFFER_SIZE: usize = 256;

/// Trait defining the interface for MIDI transport implementations
pub trait MidiDriver {
    fn sources(&self) -> Vec<Endpoint>;

    fn destinations(&self) -> Vec<Endpoint>;

    /// Starts receiving from a source.
    fn connect_source(&mut self, source: EndpointId) -> Result<ConnectionToken>;

    /// Closes a source or spy connection.
    fn disconnect(&mut self, token: ConnectionToken) -> Result<()>;

    fn supports_spying(&self) -> bool {
        false
    }

    /// Taps the traffic other programs send to `destination`.
    fn connect_spy(&mut self, destination: EndpointId) -> Result<ConnectionToken>;

    /// Creates a destination other programs can send to; its packets arrive
    /// under the returned token.
    fn create_virtual_destination(&mut self, name: &str) -> Result<(Endpoint, ConnectionToken)>;

    /// Creates a source other programs can listen to.
    fn create_virtual_source(&mut self, name: &str) -> Result<Endpoint>;

    fn dispose_virtual(&mut self, endpoint: EndpointId) -> Result<()>;

    /// Sends bytes to a destination or through one of our virtual sources.
    /// `timestamp` of `None` means as soon as possible.
    fn send(&mut self, endpoint: EndpointId, timestamp: Option<u64>, data: &[u8]) -> Result<()>;

    /// Starts a paced SysEx transfer. Progress and completion are reported
    /// with `SysExSendProgress` / `SysExSendFinished`.
    fn begin_sysex_send(
        &mut self,
        destination: EndpointId,
        data: Vec<u8>,
        buffer_size: usize,
    ) -> Result<SendRequestId>;

    /// Asks an in-flight transfer to stop. Completion is still reported.
    fn cancel_sysex_send(&mut self, request: SendRequestId);

    /// Re-enumerates endpoints and emits change events for any churn.
    fn rescan(&mut self) {}
}
