use thiserror::Error;

/// Errors raised while opening transports, loading configuration or
/// reading and writing librarian files.
///
/// The multiplexers and the transfer engine never hand these to their
/// callers; transport hiccups are logged or folded into a transfer outcome.
#[derive(Error, Debug)]
pub enum MidiplexError {
    #[error("MIDI driver error: {0}")]
    Driver(String),

    #[error("MIDI endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Unsupported by this driver: {0}")]
    Unsupported(&'static str),

    #[error("Invalid persistent settings: {0}")]
    Settings(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid SysEx data: {0}")]
    InvalidSysEx(String),

    #[error("Prompt failed: {0}")]
    Prompt(String),
}

impl From<midir::InitError> for MidiplexError {
    fn from(e: midir::InitError) -> Self {
        MidiplexError::Driver(e.to_string())
    }
}

impl<T> From<midir::ConnectError<T>> for MidiplexError {
    fn from(e: midir::ConnectError<T>) -> Self {
        MidiplexError::Driver(e.to_string())
    }
}

impl From<midir::SendError> for MidiplexError {
    fn from(e: midir::SendError) -> Self {
        MidiplexError::Driver(e.to_string())
    }
}

impl From<midir::PortInfoError> for MidiplexError {
    fn from(e: midir::PortInfoError) -> Self {
        MidiplexError::Driver(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MidiplexError>;
