//! Input providers and the multiplexer that combines them.
//!
//! - [`PortInputStream`] listens to hardware and other programs' sources
//! - [`VirtualInputStream`] owns a destination other programs can send to
//! - [`SpyAttachmentManager`] taps output headed for other destinations
//! - [`CombinationInputStream`] presents all three as one source list

mod combination;
mod port;
mod spy;
mod virtual_input;

pub use combination::{CombinationInputStream, InputEvent};
pub use port::PortInputStream;
pub use spy::SpyAttachmentManager;
pub use virtual_input::VirtualInputStream;

use crate::driver::{ConnectionToken, MidiDriver};
use crate::endpoint::{Endpoint, EndpointId, InputSource, ProviderKind, SourceGroup};
use crate::error::Result;
use crate::parser::MessageParser;
use crate::registry::resolve_saved;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// One input provider as seen by the multiplexer.
pub trait InputStream {
    fn kind(&self) -> ProviderKind;

    /// Sources this provider can offer right now.
    fn sources(&self, driver: &dyn MidiDriver) -> Vec<InputSource>;

    fn selected_sources(&self) -> HashSet<InputSource>;

    /// Replaces the selection. Callers pass only sources this provider
    /// currently offers.
    fn set_selected_sources(&mut self, driver: &mut dyn MidiDriver, sources: &HashSet<InputSource>);

    fn owns(&self, token: ConnectionToken) -> bool;

    fn parser_mut(&mut self, token: ConnectionToken) -> Option<&mut MessageParser>;

    fn parsers_mut(&mut self) -> Vec<&mut MessageParser>;

    /// Returns true if the selection changed.
    fn endpoint_disappeared(&mut self, _driver: &mut dyn MidiDriver, _endpoint: EndpointId) -> bool {
        false
    }

    /// Returns true if the selection changed.
    fn endpoint_replaced(
        &mut self,
        _driver: &mut dyn MidiDriver,
        _old: EndpointId,
        _new: EndpointId,
    ) -> bool {
        false
    }

    fn persistent_settings(&self) -> Option<Value>;

    /// Restores a selection, returning the names of endpoints that could
    /// not be found.
    fn apply_persistent_settings(&mut self, driver: &mut dyn MidiDriver, settings: &Value)
        -> Vec<String>;

    fn source_group(&self, driver: &dyn MidiDriver) -> SourceGroup {
        SourceGroup::new(self.kind(), self.sources(driver))
    }
}

/// A saved endpoint reference. Either field may be missing in settings
/// written by older versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedEndpoint {
    #[serde(rename = "uniqueID", default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SavedEndpoint {
    pub fn from_endpoint(id: EndpointId, name: &str) -> Self {
        Self {
            unique_id: Some(id.0),
            name: Some(name.to_string()),
        }
    }

    pub fn display_name(&self) -> String {
        match (&self.name, self.unique_id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => format!("endpoint #{}", id),
            (None, None) => "unknown endpoint".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedEndpoints {
    #[serde(default)]
    pub endpoints: Vec<SavedEndpoint>,
}

impl SavedEndpoints {
    pub fn parse(settings: &Value) -> Self {
        match serde_json::from_value(settings.clone()) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Ignoring malformed input settings: {}", e);
                Self::default()
            }
        }
    }

    /// Matches saved endpoints against `candidates` by ID, then by name.
    pub fn resolve(&self, candidates: &[Endpoint]) -> (Vec<Endpoint>, Vec<String>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for saved in &self.endpoints {
            match resolve_saved(
                candidates,
                saved.unique_id.map(EndpointId),
                saved.name.as_deref(),
            ) {
                Some(endpoint) => found.push(endpoint),
                None => missing.push(saved.display_name()),
            }
        }
        (found, missing)
    }
}

struct Attachment {
    token: ConnectionToken,
    name: String,
    parser: MessageParser,
}

/// Connections for a provider that attaches to many endpoints, with one
/// parser per connection. Tokens map back to endpoints explicitly.
pub(crate) struct AttachedEndpoints {
    kind: ProviderKind,
    attachments: BTreeMap<EndpointId, Attachment>,
    tokens: HashMap<ConnectionToken, EndpointId>,
    sysex_timeout: Duration,
}

pub(crate) type ConnectFn = fn(&mut dyn MidiDriver, EndpointId) -> Result<ConnectionToken>;

impl AttachedEndpoints {
    pub(crate) fn new(kind: ProviderKind, sysex_timeout: Duration) -> Self {
        Self {
            kind,
            attachments: BTreeMap::new(),
            tokens: HashMap::new(),
            sysex_timeout,
        }
    }

    pub(crate) fn contains(&self, endpoint: EndpointId) -> bool {
        self.attachments.contains_key(&endpoint)
    }

    pub(crate) fn owns(&self, token: ConnectionToken) -> bool {
        self.tokens.contains_key(&token)
    }

    pub(crate) fn selected_sources(&self) -> HashSet<InputSource> {
        self.attachments
            .iter()
            .map(|(id, a)| InputSource {
                kind: self.kind,
                endpoint: *id,
                name: a.name.clone(),
            })
            .collect()
    }

    pub(crate) fn parser_mut(&mut self, token: ConnectionToken) -> Option<&mut MessageParser> {
        let endpoint = self.tokens.get(&token)?;
        self.attachments.get_mut(endpoint).map(|a| &mut a.parser)
    }

    pub(crate) fn parsers_mut(&mut self) -> Vec<&mut MessageParser> {
        self.attachments.values_mut().map(|a| &mut a.parser).collect()
    }

    pub(crate) fn attach(
        &mut self,
        driver: &mut dyn MidiDriver,
        endpoint: &Endpoint,
        connect: ConnectFn,
    ) -> bool {
        if self.contains(endpoint.id) {
            return false;
        }
        match connect(driver, endpoint.id) {
            Ok(token) => {
                debug!("{:?} attached to {} ({:?})", self.kind, endpoint.name, token);
                self.tokens.insert(token, endpoint.id);
                self.attachments.insert(
                    endpoint.id,
                    Attachment {
                        token,
                        name: endpoint.name.clone(),
                        parser: MessageParser::new(self.sysex_timeout),
                    },
                );
                true
            }
            Err(e) => {
                warn!("{:?} could not attach to {}: {}", self.kind, endpoint.name, e);
                false
            }
        }
    }

    pub(crate) fn detach(&mut self, driver: &mut dyn MidiDriver, endpoint: EndpointId) -> bool {
        let Some(attachment) = self.attachments.remove(&endpoint) else {
            return false;
        };
        self.tokens.remove(&attachment.token);
        if let Err(e) = driver.disconnect(attachment.token) {
            // Usually the endpoint is already gone.
            debug!("{:?} disconnect from {} failed: {}", self.kind, attachment.name, e);
        }
        true
    }

    pub(crate) fn detach_all(&mut self, driver: &mut dyn MidiDriver) {
        let endpoints: Vec<EndpointId> = self.attachments.keys().copied().collect();
        for endpoint in endpoints {
            self.detach(driver, endpoint);
        }
    }

    /// Makes the attachments match `wanted`, connecting and disconnecting
    /// per endpoint. A failure on one endpoint does not stop the others.
    pub(crate) fn apply_selection(
        &mut self,
        driver: &mut dyn MidiDriver,
        wanted: &[Endpoint],
        connect: ConnectFn,
    ) {
        let wanted_ids: HashSet<EndpointId> = wanted.iter().map(|e| e.id).collect();
        let stale: Vec<EndpointId> = self
            .attachments
            .keys()
            .filter(|id| !wanted_ids.contains(id))
            .copied()
            .collect();
        for endpoint in stale {
            self.detach(driver, endpoint);
        }
        for endpoint in wanted {
            self.attach(driver, endpoint, connect);
        }
    }

    pub(crate) fn replace(
        &mut self,
        driver: &mut dyn MidiDriver,
        old: EndpointId,
        replacement: Option<Endpoint>,
        connect: ConnectFn,
    ) -> bool {
        if !self.detach(driver, old) {
            return false;
        }
        if let Some(endpoint) = replacement {
            self.attach(driver, &endpoint, connect);
        }
        true
    }

    pub(crate) fn saved(&self) -> SavedEndpoints {
        SavedEndpoints {
            endpoints: self
                .attachments
                .iter()
                .map(|(id, a)| SavedEndpoint::from_endpoint(*id, &a.name))
                .collect(),
        }
    }
}

/// Endpoints from `offered` whose sources appear in `selection`.
pub(crate) fn wanted_endpoints(
    kind: ProviderKind,
    offered: Vec<Endpoint>,
    selection: &HashSet<InputSource>,
) -> Vec<Endpoint> {
    offered
        .into_iter()
        .filter(|e| selection.contains(&InputSource::new(kind, e)))
        .collect()
}
