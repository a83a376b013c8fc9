use super::{wanted_endpoints, AttachedEndpoints, InputStream, SavedEndpoints};
use crate::driver::{ConnectionToken, MidiDriver};
use crate::endpoint::{EndpointId, InputSource, ProviderKind};
use crate::error::Result;
use crate::parser::MessageParser;
use crate::registry::EndpointRegistry;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

fn connect_source(driver: &mut dyn MidiDriver, source: EndpointId) -> Result<ConnectionToken> {
    driver.connect_source(source)
}

/// Listens to sources owned by hardware or other programs.
pub struct PortInputStream {
    attached: AttachedEndpoints,
}

impl PortInputStream {
    pub fn new(sysex_timeout: Duration) -> Self {
        Self {
            attached: AttachedEndpoints::new(ProviderKind::Port, sysex_timeout),
        }
    }

    pub fn close(&mut self, driver: &mut dyn MidiDriver) {
        self.attached.detach_all(driver);
    }
}

impl InputStream for PortInputStream {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Port
    }

    fn sources(&self, driver: &dyn MidiDriver) -> Vec<InputSource> {
        EndpointRegistry::new(driver)
            .sources()
            .iter()
            .map(|e| InputSource::new(ProviderKind::Port, e))
            .collect()
    }

    fn selected_sources(&self) -> HashSet<InputSource> {
        self.attached.selected_sources()
    }

    fn set_selected_sources(&mut self, driver: &mut dyn MidiDriver, sources: &HashSet<InputSource>) {
        let offered = EndpointRegistry::new(driver).sources();
        let wanted = wanted_endpoints(ProviderKind::Port, offered, sources);
        self.attached.apply_selection(driver, &wanted, connect_source);
    }

    fn owns(&self, token: ConnectionToken) -> bool {
        self.attached.owns(token)
    }

    fn parser_mut(&mut self, token: ConnectionToken) -> Option<&mut MessageParser> {
        self.attached.parser_mut(token)
    }

    fn parsers_mut(&mut self) -> Vec<&mut MessageParser> {
        self.attached.parsers_mut()
    }

    fn endpoint_disappeared(&mut self, driver: &mut dyn MidiDriver, endpoint: EndpointId) -> bool {
        self.attached.detach(driver, endpoint)
    }

    fn endpoint_replaced(
        &mut self,
        driver: &mut dyn MidiDriver,
        old: EndpointId,
        new: EndpointId,
    ) -> bool {
        let replacement = EndpointRegistry::new(driver).source(new);
        self.attached.replace(driver, old, replacement, connect_source)
    }

    fn persistent_settings(&self) -> Option<Value> {
        let saved = self.attached.saved();
        if saved.endpoints.is_empty() {
            return None;
        }
        serde_json::to_value(saved).ok()
    }

    fn apply_persistent_settings(
        &mut self,
        driver: &mut dyn MidiDriver,
        settings: &Value,
    ) -> Vec<String> {
        let offered = EndpointRegistry::new(driver).sources();
        let (found, missing) = SavedEndpoints::parse(settings).resolve(&offered);
        self.attached.apply_selection(driver, &found, connect_source);
        missing
    }
}
