//! Endpoint handles and the selection units built on top of them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Unique numeric ID of a MIDI endpoint, assigned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointId(pub u32);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A MIDI source or destination as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    /// Set for endpoints created by this process (our virtual endpoints).
    pub owned_by_self: bool,
    /// Names of external devices wired to this endpoint, if the driver knows them.
    pub external_devices: Vec<String>,
}

impl Endpoint {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: EndpointId(id),
            name: name.into(),
            owned_by_self: false,
            external_devices: Vec::new(),
        }
    }

    pub fn owned(mut self) -> Self {
        self.owned_by_self = true;
        self
    }
}

/// Which input provider an endpoint was reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    Port,
    Virtual,
    Spy,
}

impl ProviderKind {
    pub fn group_name(self) -> &'static str {
        match self {
            ProviderKind::Port => "MIDI sources",
            ProviderKind::Virtual => "Act as a destination for other programs",
            ProviderKind::Spy => "Spy on output to destinations",
        }
    }

    pub fn settings_key(self) -> &'static str {
        match self {
            ProviderKind::Port => "portInputStream",
            ProviderKind::Virtual => "virtualInputStream",
            ProviderKind::Spy => "spyingInputStream",
        }
    }
}

/// The unit of input selection: an endpoint tagged with the provider it
/// came through. Two sources are equal iff provider and endpoint ID match;
/// the display name is not part of the identity.
#[derive(Debug, Clone)]
pub struct InputSource {
    pub kind: ProviderKind,
    pub endpoint: EndpointId,
    pub name: String,
}

impl InputSource {
    pub fn new(kind: ProviderKind, endpoint: &Endpoint) -> Self {
        Self {
            kind,
            endpoint: endpoint.id,
            name: endpoint.name.clone(),
        }
    }
}

impl PartialEq for InputSource {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.endpoint == other.endpoint
    }
}

impl Eq for InputSource {}

impl Hash for InputSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.endpoint.hash(state);
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Named, ordered collection of sources offered by one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceGroup {
    pub name: String,
    pub kind: ProviderKind,
    pub expandable: bool,
    pub sources: Vec<InputSource>,
}

impl SourceGroup {
    pub fn new(kind: ProviderKind, sources: Vec<InputSource>) -> Self {
        Self {
            name: kind.group_name().to_string(),
            kind,
            expandable: kind != ProviderKind::Virtual,
            sources,
        }
    }
}

/// A selectable sink for outgoing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDestination {
    /// A concrete destination endpoint owned by somebody else.
    Port(Endpoint),
    /// Our own virtual source that other programs can listen to.
    Virtual,
}

impl OutputDestination {
    pub fn name(&self) -> &str {
        match self {
            OutputDestination::Port(endpoint) => &endpoint.name,
            OutputDestination::Virtual => "Act as a source for other programs",
        }
    }
}

impl fmt::Display for OutputDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_input_source_identity_ignores_name() {
        let a = InputSource::new(ProviderKind::Port, &Endpoint::new(1, "Synth"));
        let renamed = InputSource::new(ProviderKind::Port, &Endpoint::new(1, "Synth (USB)"));
        assert_eq!(a, renamed);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&renamed));
    }

    #[test]
    fn test_input_source_identity_includes_provider() {
        let endpoint = Endpoint::new(5, "Drum Machine");
        let port = InputSource::new(ProviderKind::Port, &endpoint);
        let spy = InputSource::new(ProviderKind::Spy, &endpoint);
        assert_ne!(port, spy);
    }

    #[test]
    fn test_source_group_expandable() {
        assert!(SourceGroup::new(ProviderKind::Port, vec![]).expandable);
        assert!(!SourceGroup::new(ProviderKind::Virtual, vec![]).expandable);
        assert_eq!(
            SourceGroup::new(ProviderKind::Spy, vec![]).name,
            "Spy on output to destinations"
        );
    }
}
