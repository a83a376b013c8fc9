use super::{OutputOptions, PortOutputStream, VirtualOutputStream};
use crate::driver::{DriverEvent, MidiDriver, SendRequestId};
use crate::endpoint::{Endpoint, EndpointId, OutputDestination};
use crate::error::{MidiplexError, Result};
use crate::input::SavedEndpoint;
use crate::message::{SystemExclusive, TimedMessage};
use crate::registry::{resolve_saved, EndpointRegistry};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    DestinationListChanged,
    /// The selected port destination went away. Choosing a replacement is
    /// up to the caller.
    DestinationDisappeared(Endpoint),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OutputSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<SavedEndpoint>,
    #[serde(rename = "virtual", default)]
    use_virtual: bool,
}

/// Routes outgoing messages to either a port destination or our virtual
/// source. At most one of the two paths exists at any time.
pub struct CombinationOutputStream {
    virtual_name: String,
    options: OutputOptions,
    port: Option<PortOutputStream>,
    virtual_stream: Option<VirtualOutputStream>,
}

impl CombinationOutputStream {
    pub fn new(virtual_name: impl Into<String>, options: OutputOptions) -> Self {
        Self {
            virtual_name: virtual_name.into(),
            options,
            port: None,
            virtual_stream: None,
        }
    }

    /// Port destinations followed by the virtual source.
    pub fn destinations(&self, driver: &dyn MidiDriver) -> Vec<OutputDestination> {
        EndpointRegistry::new(driver)
            .destinations()
            .into_iter()
            .map(OutputDestination::Port)
            .chain(std::iter::once(OutputDestination::Virtual))
            .collect()
    }

    pub fn selected_destination(&self) -> Option<OutputDestination> {
        if self.virtual_stream.is_some() {
            Some(OutputDestination::Virtual)
        } else {
            self.port
                .as_ref()
                .map(|port| OutputDestination::Port(port.destination().clone()))
        }
    }

    pub fn is_port_active(&self) -> bool {
        self.port.is_some()
    }

    pub fn is_virtual_active(&self) -> bool {
        self.virtual_stream.is_some()
    }

    pub fn select(&mut self, driver: &mut dyn MidiDriver, destination: OutputDestination) {
        match destination {
            OutputDestination::Port(endpoint) => {
                if let Some(virtual_stream) = self.virtual_stream.take() {
                    virtual_stream.close(driver);
                }
                match self.port.as_mut() {
                    Some(port) => port.set_destination(endpoint),
                    None => self.port = Some(PortOutputStream::new(endpoint, self.options)),
                }
            }
            OutputDestination::Virtual => {
                self.port = None;
                if self.virtual_stream.is_none() {
                    match VirtualOutputStream::open(driver, &self.virtual_name) {
                        Ok(stream) => self.virtual_stream = Some(stream),
                        Err(e) => error!("Could not create virtual source: {}", e),
                    }
                }
            }
        }
    }

    /// Tears down whichever path is active.
    pub fn deselect(&mut self, driver: &mut dyn MidiDriver) {
        self.port = None;
        if let Some(virtual_stream) = self.virtual_stream.take() {
            virtual_stream.close(driver);
        }
    }

    /// Sends through the active path. With no path, messages are dropped.
    pub fn take_messages(&mut self, driver: &mut dyn MidiDriver, messages: &[TimedMessage]) {
        if let Some(port) = self.port.as_mut() {
            port.take_messages(driver, messages);
        } else if let Some(virtual_stream) = self.virtual_stream.as_mut() {
            virtual_stream.take_messages(driver, messages);
        } else {
            debug!("No destination; dropping {} messages", messages.len());
        }
    }

    /// Only the port path can pace SysEx through the driver.
    pub fn can_send_sysex_async(&self) -> bool {
        self.port
            .as_ref()
            .is_some_and(|port| port.can_send_sysex_async())
    }

    pub fn send_sysex_async(
        &mut self,
        driver: &mut dyn MidiDriver,
        sysex: &SystemExclusive,
    ) -> Result<SendRequestId> {
        match self.port.as_mut() {
            Some(port) if port.can_send_sysex_async() => port.send_sysex_async(driver, sysex),
            _ => Err(MidiplexError::Unsupported("asynchronous SysEx on this output")),
        }
    }

    pub fn cancel_sysex_send(&mut self, driver: &mut dyn MidiDriver, request: SendRequestId) {
        match self.port.as_mut() {
            Some(port) => port.cancel_sysex_send(driver, request),
            None => driver.cancel_sysex_send(request),
        }
    }

    pub fn options(&self) -> OutputOptions {
        self.options
    }

    fn update_options(&mut self, update: impl FnOnce(&mut OutputOptions)) {
        update(&mut self.options);
        if let Some(port) = self.port.as_mut() {
            port.set_options(self.options);
        }
    }

    pub fn set_ignores_timestamps(&mut self, ignores: bool) {
        self.update_options(|o| o.ignores_timestamps = ignores);
    }

    pub fn set_sends_sysex_async(&mut self, sends_async: bool) {
        self.update_options(|o| o.sends_sysex_async = sends_async);
    }

    fn port_destination_id(&self) -> Option<EndpointId> {
        self.port.as_ref().map(|port| port.destination().id)
    }

    pub fn handle_driver_event(
        &mut self,
        driver: &mut dyn MidiDriver,
        event: &DriverEvent,
    ) -> Option<OutputEvent> {
        match *event {
            DriverEvent::EndpointsChanged => Some(OutputEvent::DestinationListChanged),
            DriverEvent::EndpointDisappeared { endpoint }
                if self.port_destination_id() == Some(endpoint) =>
            {
                let gone = self.port.as_ref()?.destination().clone();
                warn!("Output destination {} disappeared", gone.name);
                Some(OutputEvent::DestinationDisappeared(gone))
            }
            DriverEvent::EndpointReplaced { old, new } if self.port_destination_id() == Some(old) => {
                match EndpointRegistry::new(driver).destination(new) {
                    Some(replacement) => {
                        info!("Output destination {} was replaced", replacement.name);
                        self.select(driver, OutputDestination::Port(replacement));
                        Some(OutputEvent::DestinationListChanged)
                    }
                    None => {
                        let gone = self.port.as_ref()?.destination().clone();
                        Some(OutputEvent::DestinationDisappeared(gone))
                    }
                }
            }
            _ => None,
        }
    }

    pub fn persistent_settings(&self) -> Option<Value> {
        let settings = match (&self.port, &self.virtual_stream) {
            (Some(port), _) => OutputSettings {
                destination: Some(SavedEndpoint::from_endpoint(
                    port.destination().id,
                    &port.destination().name,
                )),
                use_virtual: false,
            },
            (None, Some(_)) => OutputSettings {
                destination: None,
                use_virtual: true,
            },
            (None, None) => return None,
        };
        serde_json::to_value(settings).ok()
    }

    /// Restores the destination by ID, falling back to its name. Returns
    /// the name of the destination if neither matches.
    pub fn apply_persistent_settings(
        &mut self,
        driver: &mut dyn MidiDriver,
        settings: &Value,
    ) -> Vec<String> {
        let settings: OutputSettings = match serde_json::from_value(settings.clone()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring malformed output settings: {}", e);
                return Vec::new();
            }
        };

        if settings.use_virtual {
            self.select(driver, OutputDestination::Virtual);
            return Vec::new();
        }

        let Some(saved) = settings.destination else {
            return Vec::new();
        };
        let candidates = EndpointRegistry::new(driver).destinations();
        match resolve_saved(
            &candidates,
            saved.unique_id.map(EndpointId),
            saved.name.as_deref(),
        ) {
            Some(endpoint) => {
                self.select(driver, OutputDestination::Port(endpoint));
                Vec::new()
            }
            None => vec![saved.display_name()],
        }
    }

    pub fn close(&mut self, driver: &mut dyn MidiDriver) {
        self.deselect(driver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::message::MidiMessage;

    fn exactly_one_path(output: &CombinationOutputStream) -> bool {
        !(output.is_port_active() && output.is_virtual_active())
    }

    #[test]
    fn test_switching_paths_is_exclusive() {
        let (mut driver, handle, _rx) = MockDriver::new();
        let synth = Endpoint::new(1, "Synth");
        handle.add_destination(synth.clone());

        let mut output = CombinationOutputStream::new("midiplex", OutputOptions::default());
        assert_eq!(output.selected_destination(), None);

        output.select(&mut driver, OutputDestination::Virtual);
        assert!(exactly_one_path(&output));
        assert_eq!(output.selected_destination(), Some(OutputDestination::Virtual));
        assert_eq!(handle.virtual_sources().len(), 1);

        output.select(&mut driver, OutputDestination::Port(synth.clone()));
        assert!(exactly_one_path(&output));
        assert_eq!(
            output.selected_destination(),
            Some(OutputDestination::Port(synth))
        );
        assert!(handle.virtual_sources().is_empty());

        output.select(&mut driver, OutputDestination::Virtual);
        assert!(exactly_one_path(&output));
        assert!(!output.is_port_active());
    }

    #[test]
    fn test_messages_without_destination_are_dropped() {
        let (mut driver, handle, _rx) = MockDriver::new();
        let mut output = CombinationOutputStream::new("midiplex", OutputOptions::default());
        output.take_messages(&mut driver, &[TimedMessage::now(MidiMessage::Clock)]);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn test_options_survive_destination_switch() {
        let (mut driver, handle, _rx) = MockDriver::new();
        let synth = Endpoint::new(1, "Synth");
        handle.add_destination(synth.clone());

        let mut output = CombinationOutputStream::new("midiplex", OutputOptions::default());
        output.set_sends_sysex_async(false);
        output.set_ignores_timestamps(false);

        output.select(&mut driver, OutputDestination::Port(synth.clone()));
        output.select(&mut driver, OutputDestination::Virtual);
        output.select(&mut driver, OutputDestination::Port(synth.clone()));
        assert!(!output.can_send_sysex_async());

        output.take_messages(&mut driver, &[TimedMessage::new(42, MidiMessage::Start)]);
        let sent = handle.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].timestamp, Some(42));
        assert_eq!(sent[0].endpoint, synth.id);
    }

    #[test]
    fn test_virtual_path_cannot_send_async() {
        let (mut driver, _handle, _rx) = MockDriver::new();
        let mut output = CombinationOutputStream::new("midiplex", OutputOptions::default());
        output.select(&mut driver, OutputDestination::Virtual);
        assert!(!output.can_send_sysex_async());
        assert!(output
            .send_sysex_async(&mut driver, &SystemExclusive::new(vec![0x7E]))
            .is_err());
    }

    #[test]
    fn test_disappearing_destination_is_reported() {
        let (mut driver, handle, _rx) = MockDriver::new();
        let synth = Endpoint::new(1, "Synth");
        handle.add_destination(synth.clone());

        let mut output = CombinationOutputStream::new("midiplex", OutputOptions::default());
        output.select(&mut driver, OutputDestination::Port(synth.clone()));

        let unrelated = DriverEvent::EndpointDisappeared {
            endpoint: EndpointId(99),
        };
        assert_eq!(output.handle_driver_event(&mut driver, &unrelated), None);

        handle.remove_endpoint(synth.id);
        let event = DriverEvent::EndpointDisappeared { endpoint: synth.id };
        assert_eq!(
            output.handle_driver_event(&mut driver, &event),
            Some(OutputEvent::DestinationDisappeared(synth))
        );
    }

    #[test]
    fn test_restore_falls_back_to_name() {
        let (mut driver, handle, _rx) = MockDriver::new();
        handle.add_destination(Endpoint::new(9, "Synth A"));

        let mut output = CombinationOutputStream::new("midiplex", OutputOptions::default());
        let saved = serde_json::json!({ "destination": { "uniqueID": 7, "name": "Synth A" } });
        let missing = output.apply_persistent_settings(&mut driver, &saved);

        assert!(missing.is_empty());
        assert_eq!(
            output.selected_destination(),
            Some(OutputDestination::Port(Endpoint::new(9, "Synth A")))
        );

        let gone = serde_json::json!({ "destination": { "uniqueID": 3, "name": "Gone" } });
        assert_eq!(
            output.apply_persistent_settings(&mut driver, &gone),
            vec!["Gone".to_string()]
        );
    }
}
