use super::{ConnectionToken, DriverEvent, MidiDriver, SendRequestId};
use crate::endpoint::{Endpoint, EndpointId};
use crate::error::{MidiplexError, Result};
use crossbeam::channel::Sender;
use log::{debug, error, info, trace, warn};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

// One byte on a DIN MIDI cable takes 320 µs; chunks are spaced so a paced
// send never outruns the wire.
const MICROS_PER_WIRE_BYTE: u64 = 320;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    Source,
    Destination,
}

type SharedOutput = Arc<Mutex<MidiOutputConnection>>;

/// Cancel flags of the SysEx sends in flight. The worker thread holds the
/// other reference to each flag, so a flag nobody else holds belongs to a
/// send that is over.
#[derive(Default)]
struct Transfers {
    flags: HashMap<SendRequestId, Arc<AtomicBool>>,
}

impl Transfers {
    fn start(&mut self, request: SendRequestId) -> Arc<AtomicBool> {
        self.prune();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.flags.insert(request, Arc::clone(&cancelled));
        cancelled
    }

    fn cancel(&mut self, request: SendRequestId) -> bool {
        let found = match self.flags.remove(&request) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        };
        self.prune();
        found
    }

    fn prune(&mut self) {
        self.flags.retain(|_, flag| Arc::strong_count(flag) > 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.flags.len()
    }
}

/// Driver backed by midir. Endpoint IDs are assigned per port name and stay
/// stable for the lifetime of the driver, so a device that is unplugged and
/// plugged back in keeps its ID.
pub struct MidirDriver {
    client_name: String,
    events: Sender<DriverEvent>,
    ids: HashMap<(Direction, String), EndpointId>,
    next_id: u32,
    sources: Vec<Endpoint>,
    destinations: Vec<Endpoint>,
    owned_names: HashSet<String>,
    inputs: HashMap<ConnectionToken, MidiInputConnection<()>>,
    outputs: HashMap<EndpointId, SharedOutput>,
    virtual_sources: HashMap<EndpointId, SharedOutput>,
    virtual_destinations: HashMap<EndpointId, ConnectionToken>,
    transfers: Transfers,
    next_token: u64,
    next_request: u64,
}

impl MidirDriver {
    pub fn new(client_name: impl Into<String>, events: Sender<DriverEvent>) -> Result<Self> {
        let mut driver = MidirDriver {
            client_name: client_name.into(),
            events,
            ids: HashMap::new(),
            next_id: 1,
            sources: Vec::new(),
            destinations: Vec::new(),
            owned_names: HashSet::new(),
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            virtual_sources: HashMap::new(),
            virtual_destinations: HashMap::new(),
            transfers: Transfers::default(),
            next_token: 0,
            next_request: 0,
        };

        // Fail early if the platform has no MIDI service at all.
        MidiInput::new(&driver.client_name)?;
        MidiOutput::new(&driver.client_name)?;

        let (sources, destinations) = driver.enumerate();
        info!(
            "MIDI driver opened with {} sources and {} destinations",
            sources.len(),
            destinations.len()
        );
        driver.sources = sources;
        driver.destinations = destinations;
        Ok(driver)
    }

    fn endpoint_id(&mut self, direction: Direction, name: &str) -> EndpointId {
        if let Some(id) = self.ids.get(&(direction, name.to_string())) {
            return *id;
        }
        let id = EndpointId(self.next_id);
        self.next_id += 1;
        self.ids.insert((direction, name.to_string()), id);
        id
    }

    fn make_endpoint(&mut self, direction: Direction, name: String) -> Endpoint {
        let id = self.endpoint_id(direction, &name);
        Endpoint {
            id,
            owned_by_self: self.owned_names.contains(&name),
            name,
            external_devices: Vec::new(),
        }
    }

    fn port_names(&self) -> (Vec<String>, Vec<String>) {
        let source_names = match MidiInput::new(&self.client_name) {
            Ok(midi_in) => midi_in
                .ports()
                .iter()
                .filter_map(|p| midi_in.port_name(p).ok())
                .collect(),
            Err(e) => {
                error!("Failed to list MIDI sources: {}", e);
                Vec::new()
            }
        };
        let destination_names = match MidiOutput::new(&self.client_name) {
            Ok(midi_out) => midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect(),
            Err(e) => {
                error!("Failed to list MIDI destinations: {}", e);
                Vec::new()
            }
        };
        (source_names, destination_names)
    }

    fn enumerate(&mut self) -> (Vec<Endpoint>, Vec<Endpoint>) {
        let (source_names, destination_names) = self.port_names();
        let sources = source_names
            .into_iter()
            .map(|name| self.make_endpoint(Direction::Source, name))
            .collect();
        let destinations = destination_names
            .into_iter()
            .map(|name| self.make_endpoint(Direction::Destination, name))
            .collect();
        (sources, destinations)
    }

    fn next_token(&mut self) -> ConnectionToken {
        self.next_token += 1;
        ConnectionToken(self.next_token)
    }

    fn endpoint_name(list: &[Endpoint], id: EndpointId) -> Result<String> {
        list.iter()
            .find(|e| e.id == id)
            .map(|e| e.name.clone())
            .ok_or_else(|| MidiplexError::EndpointNotFound(id.to_string()))
    }

    fn output_for(&mut self, destination: EndpointId) -> Result<SharedOutput> {
        if let Some(output) = self.virtual_sources.get(&destination) {
            return Ok(Arc::clone(output));
        }
        if let Some(output) = self.outputs.get(&destination) {
            return Ok(Arc::clone(output));
        }

        let name = Self::endpoint_name(&self.destinations, destination)?;
        let midi_out = MidiOutput::new(&self.client_name)?;
        let ports = midi_out.ports();
        let port = ports
            .iter()
            .find(|p| midi_out.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MidiplexError::EndpointNotFound(name.clone()))?;

        info!("Connecting to MIDI destination: {}", name);
        let connection = midi_out.connect(port, &format!("{}-output", self.client_name))?;
        let output = Arc::new(Mutex::new(connection));
        self.outputs.insert(destination, Arc::clone(&output));
        Ok(output)
    }

    fn packet_forwarder(
        &self,
        token: ConnectionToken,
    ) -> impl FnMut(u64, &[u8], &mut ()) + Send + 'static {
        let events = self.events.clone();
        move |timestamp, message, _| {
            trace!("Packet on {:?}: {:02X?}", token, message);
            let _ = events.send(DriverEvent::Packet {
                token,
                timestamp,
                data: message.to_vec(),
            });
        }
    }

    #[cfg(unix)]
    fn open_virtual_destination(&mut self, name: &str) -> Result<(Endpoint, ConnectionToken)> {
        use midir::os::unix::VirtualInput;

        let mut midi_in = MidiInput::new(&self.client_name)?;
        midi_in.ignore(Ignore::None);
        let token = self.next_token();
        let connection = midi_in.create_virtual(name, self.packet_forwarder(token), ())?;

        self.owned_names.insert(name.to_string());
        let endpoint = self.make_endpoint(Direction::Destination, name.to_string());
        self.inputs.insert(token, connection);
        self.virtual_destinations.insert(endpoint.id, token);
        Ok((endpoint, token))
    }

    #[cfg(not(unix))]
    fn open_virtual_destination(&mut self, _name: &str) -> Result<(Endpoint, ConnectionToken)> {
        Err(MidiplexError::Unsupported("virtual endpoints"))
    }

    #[cfg(unix)]
    fn open_virtual_source(&mut self, name: &str) -> Result<Endpoint> {
        use midir::os::unix::VirtualOutput;

        let midi_out = MidiOutput::new(&self.client_name)?;
        let connection = midi_out.create_virtual(name)?;

        self.owned_names.insert(name.to_string());
        let endpoint = self.make_endpoint(Direction::Source, name.to_string());
        self.virtual_sources
            .insert(endpoint.id, Arc::new(Mutex::new(connection)));
        Ok(endpoint)
    }

    #[cfg(not(unix))]
    fn open_virtual_source(&mut self, _name: &str) -> Result<Endpoint> {
        Err(MidiplexError::Unsupported("virtual endpoints"))
    }
}

fn run_transfer(
    output: SharedOutput,
    data: Vec<u8>,
    buffer_size: usize,
    request: SendRequestId,
    cancelled: Arc<AtomicBool>,
    events: Sender<DriverEvent>,
) {
    let mut bytes_sent = 0;
    for chunk in data.chunks(buffer_size.max(1)) {
        if cancelled.load(Ordering::SeqCst) {
            debug!("SysEx send {:?} cancelled after {} bytes", request, bytes_sent);
            break;
        }
        let result = match output.lock() {
            Ok(mut connection) => connection.send(chunk).map_err(|e| e.to_string()),
            Err(_) => Err("output connection poisoned".to_string()),
        };
        if let Err(e) = result {
            error!("SysEx send {:?} failed: {}", request, e);
            break;
        }
        bytes_sent += chunk.len();
        let _ = events.send(DriverEvent::SysExSendProgress {
            request,
            bytes_sent,
        });
        thread::sleep(Duration::from_micros(
            chunk.len() as u64 * MICROS_PER_WIRE_BYTE,
        ));
    }

    let _ = events.send(DriverEvent::SysExSendFinished {
        request,
        bytes_sent,
        all_bytes_sent: bytes_sent == data.len(),
    });
}

impl MidiDriver for MidirDriver {
    fn sources(&self) -> Vec<Endpoint> {
        self.sources.clone()
    }

    fn destinations(&self) -> Vec<Endpoint> {
        self.destinations.clone()
    }

    fn connect_source(&mut self, source: EndpointId) -> Result<ConnectionToken> {
        let name = Self::endpoint_name(&self.sources, source)?;
        let mut midi_in = MidiInput::new(&self.client_name)?;
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| midi_in.port_name(p).map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MidiplexError::EndpointNotFound(name.clone()))?;

        let token = self.next_token();
        let connection = midi_in.connect(
            port,
            &format!("{}-input", self.client_name),
            self.packet_forwarder(token),
            (),
        )?;
        info!("Connected to MIDI source: {}", name);
        self.inputs.insert(token, connection);
        Ok(token)
    }

    fn disconnect(&mut self, token: ConnectionToken) -> Result<()> {
        let connection = self
            .inputs
            .remove(&token)
            .ok_or_else(|| MidiplexError::Driver(format!("unknown connection {:?}", token)))?;
        connection.close();
        debug!("Closed connection {:?}", token);
        Ok(())
    }

    fn connect_spy(&mut self, _destination: EndpointId) -> Result<ConnectionToken> {
        Err(MidiplexError::Unsupported("spying"))
    }

    fn create_virtual_destination(&mut self, name: &str) -> Result<(Endpoint, ConnectionToken)> {
        self.open_virtual_destination(name)
    }

    fn create_virtual_source(&mut self, name: &str) -> Result<Endpoint> {
        self.open_virtual_source(name)
    }

    fn dispose_virtual(&mut self, endpoint: EndpointId) -> Result<()> {
        if let Some(token) = self.virtual_destinations.remove(&endpoint) {
            if let Some(connection) = self.inputs.remove(&token) {
                connection.close();
            }
            return Ok(());
        }
        if let Some(output) = self.virtual_sources.remove(&endpoint) {
            drop(output);
            return Ok(());
        }
        Err(MidiplexError::EndpointNotFound(endpoint.to_string()))
    }

    fn send(&mut self, endpoint: EndpointId, timestamp: Option<u64>, data: &[u8]) -> Result<()> {
        if let Some(timestamp) = timestamp {
            // midir has no scheduled sends; everything goes out now.
            trace!("Sending message stamped {} immediately", timestamp);
        }
        let output = self.output_for(endpoint)?;
        let mut connection = output
            .lock()
            .map_err(|_| MidiplexError::Driver("output connection poisoned".to_string()))?;
        connection.send(data)?;
        Ok(())
    }

    fn begin_sysex_send(
        &mut self,
        destination: EndpointId,
        data: Vec<u8>,
        buffer_size: usize,
    ) -> Result<SendRequestId> {
        let output = self.output_for(destination)?;
        self.next_request += 1;
        let request = SendRequestId(self.next_request);
        let cancelled = self.transfers.start(request);

        let events = self.events.clone();
        debug!(
            "Starting SysEx send {:?}: {} bytes in chunks of {}",
            request,
            data.len(),
            buffer_size
        );
        thread::spawn(move || run_transfer(output, data, buffer_size, request, cancelled, events));
        Ok(request)
    }

    fn cancel_sysex_send(&mut self, request: SendRequestId) {
        if !self.transfers.cancel(request) {
            debug!("Cancel for finished SysEx send {:?}", request);
        }
    }

    fn rescan(&mut self) {
        self.transfers.prune();
        let (sources, destinations) = self.enumerate();

        let before: HashSet<EndpointId> = self
            .sources
            .iter()
            .chain(self.destinations.iter())
            .map(|e| e.id)
            .collect();
        let after: HashSet<EndpointId> = sources
            .iter()
            .chain(destinations.iter())
            .map(|e| e.id)
            .collect();

        if before == after {
            return;
        }

        for gone in before.difference(&after) {
            warn!("MIDI endpoint {} disappeared", gone);
            self.outputs.remove(gone);
            let _ = self
                .events
                .send(DriverEvent::EndpointDisappeared { endpoint: *gone });
        }
        self.sources = sources;
        self.destinations = destinations;
        let _ = self.events.send(DriverEvent::EndpointsChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_transfers_are_forgotten() {
        let mut transfers = Transfers::default();
        let first = transfers.start(SendRequestId(1));
        let second = transfers.start(SendRequestId(2));
        assert_eq!(transfers.len(), 2);

        // The worker of the first send is done.
        drop(first);
        let third = transfers.start(SendRequestId(3));
        assert_eq!(transfers.len(), 2);

        assert!(transfers.cancel(SendRequestId(2)));
        assert!(second.load(Ordering::SeqCst));
        assert!(!transfers.cancel(SendRequestId(1)));

        drop(third);
        transfers.prune();
        assert_eq!(transfers.len(), 0);
    }
}
