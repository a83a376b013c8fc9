//! Read-only view of the endpoints a driver offers, minus our own.

use crate::driver::MidiDriver;
use crate::endpoint::{Endpoint, EndpointId};

pub struct EndpointRegistry<'a> {
    driver: &'a dyn MidiDriver,
}

impl<'a> EndpointRegistry<'a> {
    pub fn new(driver: &'a dyn MidiDriver) -> Self {
        Self { driver }
    }

    /// Sources that belong to other programs or hardware.
    pub fn sources(&self) -> Vec<Endpoint> {
        self.driver
            .sources()
            .into_iter()
            .filter(|e| !e.owned_by_self)
            .collect()
    }

    /// Destinations that belong to other programs or hardware.
    pub fn destinations(&self) -> Vec<Endpoint> {
        self.driver
            .destinations()
            .into_iter()
            .filter(|e| !e.owned_by_self)
            .collect()
    }

    pub fn source(&self, id: EndpointId) -> Option<Endpoint> {
        self.sources().into_iter().find(|e| e.id == id)
    }

    pub fn destination(&self, id: EndpointId) -> Option<Endpoint> {
        self.destinations().into_iter().find(|e| e.id == id)
    }
}

/// Resolves a saved endpoint: by ID first, then by name.
pub fn resolve_saved(
    candidates: &[Endpoint],
    id: Option<EndpointId>,
    name: Option<&str>,
) -> Option<Endpoint> {
    id.and_then(|id| candidates.iter().find(|e| e.id == id))
        .or_else(|| name.and_then(|name| candidates.iter().find(|e| e.name == name)))
        .cloned()
}
