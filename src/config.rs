// config.rs

use crate::error::Result;
use crate::output::OutputOptions;
use config::{Config, Environment, File};
use log::debug;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "MIDIPLEX";

/// Engine settings: built-in defaults, then an optional file, then
/// `MIDIPLEX_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Names the driver client and our virtual endpoints.
    pub client_name: String,
    pub sysex_timeout_ms: u64,
    pub pause_between_messages_ms: u64,
    /// Bytes per chunk of an asynchronous SysEx send.
    pub custom_buffer_size: Option<usize>,
    pub ignores_timestamps: bool,
    pub sends_sysex_async: bool,
    pub spying: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_name: "midiplex".to_string(),
            sysex_timeout_ms: 1000,
            pause_between_messages_ms: 150,
            custom_buffer_size: None,
            ignores_timestamps: true,
            sends_sysex_async: true,
            spying: true,
        }
    }
}

impl EngineConfig {
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            debug!("Loading config from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        debug!("Engine config: {:?}", config);
        Ok(config)
    }

    pub fn sysex_timeout(&self) -> Duration {
        Duration::from_millis(self.sysex_timeout_ms)
    }

    pub fn pause_between_messages(&self) -> Duration {
        Duration::from_millis(self.pause_between_messages_ms)
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            ignores_timestamps: self.ignores_timestamps,
            sends_sysex_async: self.sends_sysex_async,
            custom_buffer_size: self.custom_buffer_size,
        }
    }
}
