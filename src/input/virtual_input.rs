use super::InputStream;
use crate::driver::{ConnectionToken, MidiDriver};
use crate::endpoint::{Endpoint, InputSource, ProviderKind};
use crate::error::Result;
use crate::parser::MessageParser;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Default, Serialize, Deserialize)]
struct VirtualSettings {
    #[serde(default)]
    selected: bool,
}

/// A destination we host so other programs can send to us. It exists for
/// the lifetime of the stream; selecting it only decides whether its
/// traffic is parsed and delivered.
pub struct VirtualInputStream {
    endpoint: Endpoint,
    token: ConnectionToken,
    selected: bool,
    parser: MessageParser,
}

impl VirtualInputStream {
    pub fn new(driver: &mut dyn MidiDriver, name: &str, sysex_timeout: Duration) -> Result<Self> {
        let (endpoint, token) = driver.create_virtual_destination(name)?;
        info!("Created virtual destination '{}' ({})", endpoint.name, endpoint.id);
        Ok(Self {
            endpoint,
            token,
            selected: false,
            parser: MessageParser::new(sysex_timeout),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn source(&self) -> InputSource {
        InputSource::new(ProviderKind::Virtual, &self.endpoint)
    }

    pub fn close(&mut self, driver: &mut dyn MidiDriver) {
        if let Err(e) = driver.dispose_virtual(self.endpoint.id) {
            warn!("Failed to dispose virtual destination: {}", e);
        }
    }
}

impl InputStream for VirtualInputStream {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Virtual
    }

    fn sources(&self, _driver: &dyn MidiDriver) -> Vec<InputSource> {
        vec![self.source()]
    }

    fn selected_sources(&self) -> HashSet<InputSource> {
        if self.selected {
            HashSet::from([self.source()])
        } else {
            HashSet::new()
        }
    }

    fn set_selected_sources(&mut self, _driver: &mut dyn MidiDriver, sources: &HashSet<InputSource>) {
        let selected = sources.contains(&self.source());
        if self.selected && !selected {
            self.parser.cancel_received_sysex();
        }
        self.selected = selected;
    }

    fn owns(&self, token: ConnectionToken) -> bool {
        token == self.token
    }

    fn parser_mut(&mut self, token: ConnectionToken) -> Option<&mut MessageParser> {
        if token == self.token && self.selected {
            Some(&mut self.parser)
        } else {
            None
        }
    }

    fn parsers_mut(&mut self) -> Vec<&mut MessageParser> {
        vec![&mut self.parser]
    }

    fn persistent_settings(&self) -> Option<Value> {
        if !self.selected {
            return None;
        }
        serde_json::to_value(VirtualSettings { selected: true }).ok()
    }

    fn apply_persistent_settings(
        &mut self,
        _driver: &mut dyn MidiDriver,
        settings: &Value,
    ) -> Vec<String> {
        let settings: VirtualSettings = serde_json::from_value(settings.clone()).unwrap_or_else(|e| {
            warn!("Ignoring malformed virtual input settings: {}", e);
            VirtualSettings::default()
        });
        self.selected = settings.selected;
        Vec::new()
    }
}
