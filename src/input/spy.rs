//! Spying: passively tapping what other programs send to a destination.
//!
//! The manager keeps one spy connection and one parser per destination it
//! is attached to. Packets come back tagged with a connection token, which
//! is resolved to the destination's parser through an explicit map. A
//! token for a destination detached in the meantime simply has no parser.

use super::{wanted_endpoints, AttachedEndpoints, InputStream, SavedEndpoints};
use crate::driver::{ConnectionToken, MidiDriver};
use crate::endpoint::{EndpointId, InputSource, ProviderKind};
use crate::error::Result;
use crate::parser::MessageParser;
use crate::registry::EndpointRegistry;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

fn connect_spy(driver: &mut dyn MidiDriver, destination: EndpointId) -> Result<ConnectionToken> {
    driver.connect_spy(destination)
}

pub struct SpyAttachmentManager {
    attached: AttachedEndpoints,
}

impl SpyAttachmentManager {
    pub fn new(sysex_timeout: Duration) -> Self {
        Self {
            attached: AttachedEndpoints::new(ProviderKind::Spy, sysex_timeout),
        }
    }

    pub fn is_attached(&self, destination: EndpointId) -> bool {
        self.attached.contains(destination)
    }

    pub fn close(&mut self, driver: &mut dyn MidiDriver) {
        self.attached.detach_all(driver);
    }
}

impl InputStream for SpyAttachmentManager {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Spy
    }

    fn sources(&self, driver: &dyn MidiDriver) -> Vec<InputSource> {
        EndpointRegistry::new(driver)
            .destinations()
            .iter()
            .map(|e| InputSource::new(ProviderKind::Spy, e))
            .collect()
    }

    fn selected_sources(&self) -> HashSet<InputSource> {
        self.attached.selected_sources()
    }

    fn set_selected_sources(&mut self, driver: &mut dyn MidiDriver, sources: &HashSet<InputSource>) {
        let offered = EndpointRegistry::new(driver).destinations();
        let wanted = wanted_endpoints(ProviderKind::Spy, offered, sources);
        self.attached.apply_selection(driver, &wanted, connect_spy);
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

    /// Moves the spy from `old` to `new`, keeping the user's intent across
    /// a driver reload.
    fn endpoint_replaced(
        &mut self,
        driver: &mut dyn MidiDriver,
        old: EndpointId,
        new: EndpointId,
    ) -> bool {
        let replacement = EndpointRegistry::new(driver).destination(new);
        self.attached.replace(driver, old, replacement, connect_spy)
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
        let offered = EndpointRegistry::new(driver).destinations();
        let (found, missing) = SavedEndpoints::parse(settings).resolve(&offered);
        self.attached.apply_selection(driver, &found, connect_spy);
        missing
    }
}
