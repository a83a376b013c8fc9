//! SysEx transfers: the listen/send state machine and `.syx` storage.

pub mod file;
mod transfer;

pub use transfer::{
    ListenMode, ReceiveProgress, SendProgress, SendState, SysExTransferEngine, TransferEvent,
};
