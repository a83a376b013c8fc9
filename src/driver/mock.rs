//! In-memory driver for tests and dry runs.
//!
//! [`MockDriver`] is handed to whatever owns the transport; the paired
//! [`MockHandle`] stays with the test to add and remove endpoints, inject
//! packets, and finish asynchronous sends.

use super::{ConnectionToken, DriverEvent, MidiDriver, SendRequestId};
use crate::endpoint::{Endpoint, EndpointId};
use crate::error::{MidiplexError, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockConnectionKind {
    Source,
    Spy,
    VirtualDestination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    pub kind: MockConnectionKind,
    pub endpoint: EndpointId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub endpoint: EndpointId,
    pub timestamp: Option<u64>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockSendRequest {
    pub id: SendRequestId,
    pub destination: EndpointId,
    pub data: Vec<u8>,
    pub buffer_size: usize,
}

#[derive(Debug, Default)]
struct MockState {
    sources: Vec<Endpoint>,
    destinations: Vec<Endpoint>,
    virtual_sources: Vec<Endpoint>,
    virtual_destinations: Vec<Endpoint>,
    next_virtual_id: u32,
    next_token: u64,
    next_request: u64,
    connections: BTreeMap<ConnectionToken, MockConnection>,
    sent: Vec<SentPacket>,
    sysex_requests: Vec<MockSendRequest>,
    cancelled: Vec<SendRequestId>,
    failing: HashSet<EndpointId>,
    spying: bool,
}

impl MockState {
    fn next_token(&mut self) -> ConnectionToken {
        self.next_token += 1;
        ConnectionToken(self.next_token)
    }

    fn token_for(&self, kind: MockConnectionKind, endpoint: EndpointId) -> Option<ConnectionToken> {
        self.connections
            .iter()
            .find(|(_, c)| c.kind == kind && c.endpoint == endpoint)
            .map(|(token, _)| *token)
    }
}

pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    events: Sender<DriverEvent>,
}

impl MockDriver {
    /// Creates a driver, the handle that scripts it, and the receiving end
    /// of its event channel.
    pub fn new() -> (MockDriver, MockHandle, Receiver<DriverEvent>) {
        let (tx, rx) = unbounded();
        let state = Arc::new(Mutex::new(MockState {
            next_virtual_id: 10_000,
            spying: true,
            ..MockState::default()
        }));
        let driver = MockDriver {
            state: Arc::clone(&state),
        };
        let handle = MockHandle { state, events: tx };
        (driver, handle, rx)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl MidiDriver for MockDriver {
    fn sources(&self) -> Vec<Endpoint> {
        let state = self.state();
        state
            .sources
            .iter()
            .chain(state.virtual_sources.iter())
            .cloned()
            .collect()
    }

    fn destinations(&self) -> Vec<Endpoint> {
        let state = self.state();
        state
            .destinations
            .iter()
            .chain(state.virtual_destinations.iter())
            .cloned()
            .collect()
    }

    fn connect_source(&mut self, source: EndpointId) -> Result<ConnectionToken> {
        let mut state = self.state();
        if state.failing.contains(&source) || !state.sources.iter().any(|e| e.id == source) {
            return Err(MidiplexError::Driver(format!("cannot connect to {}", source)));
        }
        let token = state.next_token();
        state.connections.insert(
            token,
            MockConnection {
                kind: MockConnectionKind::Source,
                endpoint: source,
            },
        );
        Ok(token)
    }

    fn disconnect(&mut self, token: ConnectionToken) -> Result<()> {
        self.state()
            .connections
            .remove(&token)
            .map(|_| ())
            .ok_or_else(|| MidiplexError::Driver(format!("unknown connection {:?}", token)))
    }

    fn supports_spying(&self) -> bool {
        self.state().spying
    }

    fn connect_spy(&mut self, destination: EndpointId) -> Result<ConnectionToken> {
        let mut state = self.state();
        if !state.spying {
            return Err(MidiplexError::Unsupported("spying"));
        }
        if state.failing.contains(&destination)
            || !state.destinations.iter().any(|e| e.id == destination)
        {
            return Err(MidiplexError::Driver(format!("cannot spy on {}", destination)));
        }
        let token = state.next_token();
        state.connections.insert(
            token,
            MockConnection {
                kind: MockConnectionKind::Spy,
                endpoint: destination,
            },
        );
        Ok(token)
    }

    fn create_virtual_destination(&mut self, name: &str) -> Result<(Endpoint, ConnectionToken)> {
        let mut state = self.state();
        state.next_virtual_id += 1;
        let endpoint = Endpoint::new(state.next_virtual_id, name).owned();
        let token = state.next_token();
        state.connections.insert(
            token,
            MockConnection {
                kind: MockConnectionKind::VirtualDestination,
                endpoint: endpoint.id,
            },
        );
        state.virtual_destinations.push(endpoint.clone());
        Ok((endpoint, token))
    }

    fn create_virtual_source(&mut self, name: &str) -> Result<Endpoint> {
        let mut state = self.state();
        state.next_virtual_id += 1;
        let endpoint = Endpoint::new(state.next_virtual_id, name).owned();
        state.virtual_sources.push(endpoint.clone());
        Ok(endpoint)
    }

    fn dispose_virtual(&mut self, endpoint: EndpointId) -> Result<()> {
        let mut state = self.state();
        state.virtual_sources.retain(|e| e.id != endpoint);
        state.virtual_destinations.retain(|e| e.id != endpoint);
        state.connections.retain(|_, c| c.endpoint != endpoint);
        Ok(())
    }

    fn send(&mut self, endpoint: EndpointId, timestamp: Option<u64>, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        let known = state
            .destinations
            .iter()
            .chain(state.virtual_sources.iter())
            .any(|e| e.id == endpoint);
        if !known {
            return Err(MidiplexError::EndpointNotFound(endpoint.to_string()));
        }
        state.sent.push(SentPacket {
            endpoint,
            timestamp,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn begin_sysex_send(
        &mut self,
        destination: EndpointId,
        data: Vec<u8>,
        buffer_size: usize,
    ) -> Result<SendRequestId> {
        let mut state = self.state();
        if !state.destinations.iter().any(|e| e.id == destination) {
            return Err(MidiplexError::EndpointNotFound(destination.to_string()));
        }
        state.next_request += 1;
        let id = SendRequestId(state.next_request);
        state.sysex_requests.push(MockSendRequest {
            id,
            destination,
            data,
            buffer_size,
        });
        Ok(id)
    }

    fn cancel_sysex_send(&mut self, request: SendRequestId) {
        self.state().cancelled.push(request);
    }
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }

    pub fn add_source(&self, endpoint: Endpoint) {
        self.state().sources.push(endpoint);
    }

    pub fn add_destination(&self, endpoint: Endpoint) {
        self.state().destinations.push(endpoint);
    }

    /// Removes the endpoint from both lists without emitting anything.
    pub fn remove_endpoint(&self, id: EndpointId) {
        let mut state = self.state();
        state.sources.retain(|e| e.id != id);
        state.destinations.retain(|e| e.id != id);
    }

    pub fn set_spying_supported(&self, supported: bool) {
        self.state().spying = supported;
    }

    /// Makes every connect attempt to `id` fail.
    pub fn fail_connections_to(&self, id: EndpointId) {
        self.state().failing.insert(id);
    }

    pub fn connected_sources(&self) -> Vec<EndpointId> {
        self.connections_of(MockConnectionKind::Source)
    }

    pub fn spied_destinations(&self) -> Vec<EndpointId> {
        self.connections_of(MockConnectionKind::Spy)
    }

    fn connections_of(&self, kind: MockConnectionKind) -> Vec<EndpointId> {
        let mut ids: Vec<EndpointId> = self
            .state()
            .connections
            .values()
            .filter(|c| c.kind == kind)
            .map(|c| c.endpoint)
            .collect();
        ids.sort();
        ids
    }

    pub fn virtual_sources(&self) -> Vec<Endpoint> {
        self.state().virtual_sources.clone()
    }

    pub fn virtual_destinations(&self) -> Vec<Endpoint> {
        self.state().virtual_destinations.clone()
    }

    pub fn source_token(&self, source: EndpointId) -> Option<ConnectionToken> {
        self.state().token_for(MockConnectionKind::Source, source)
    }

    pub fn spy_token(&self, destination: EndpointId) -> Option<ConnectionToken> {
        self.state().token_for(MockConnectionKind::Spy, destination)
    }

    pub fn virtual_destination_token(&self) -> Option<ConnectionToken> {
        self.state()
            .connections
            .iter()
            .find(|(_, c)| c.kind == MockConnectionKind::VirtualDestination)
            .map(|(token, _)| *token)
    }

    /// Emits a packet as if it arrived from a connected source.
    pub fn receive_from_source(&self, source: EndpointId, timestamp: u64, data: &[u8]) -> bool {
        match self.source_token(source) {
            Some(token) => {
                self.emit(DriverEvent::Packet {
                    token,
                    timestamp,
                    data: data.to_vec(),
                });
                true
            }
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.state().sent.clone()
    }

    pub fn sysex_requests(&self) -> Vec<MockSendRequest> {
        self.state().sysex_requests.clone()
    }

    pub fn cancelled_requests(&self) -> Vec<SendRequestId> {
        self.state().cancelled.clone()
    }

    /// Emits the completion of an asynchronous send. A partial send reports
    /// half of the bytes.
    pub fn finish_sysex_send(&self, request: SendRequestId, all_bytes_sent: bool) {
        let total = self
            .state()
            .sysex_requests
            .iter()
            .find(|r| r.id == request)
            .map(|r| r.data.len())
            .unwrap_or(0);
        let bytes_sent = if all_bytes_sent { total } else { total / 2 };
        self.emit(DriverEvent::SysExSendFinished {
            request,
            bytes_sent,
            all_bytes_sent,
        });
    }
}
