//! MIDI stream multiplexing and SysEx transfers.
//!
//! Inputs from hardware ports, a virtual destination we host, and (where
//! the driver allows it) taps on other programs' output are presented as
//! one selectable source list. Output goes to one hardware destination or
//! to a virtual source we host. On top of both sits a state machine that
//! receives and sends System Exclusive dumps with pacing, progress and
//! cancellation.

pub mod cli;
pub mod config;
pub mod driver;
pub mod endpoint;
pub mod error;
pub mod event_loop;
pub mod input;
pub mod logging;
pub mod message;
pub mod output;
pub mod parser;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod sysex;
pub mod ui;

pub use config::EngineConfig;
pub use driver::{DriverEvent, MidiDriver, MidirDriver, MockDriver, MockHandle};
pub use endpoint::{Endpoint, EndpointId, InputSource, OutputDestination, ProviderKind, SourceGroup};
pub use error::{MidiplexError, Result};
pub use event_loop::{EventLoop, SessionCommand};
pub use message::{MidiMessage, SystemExclusive, TimedMessage};
pub use session::{MidiSession, SessionEvent};
pub use sysex::{SendProgress, SysExTransferEngine, TransferEvent};
