//! One MIDI session: the driver, both multiplexers and the transfer engine,
//! driven from a single thread.
//!
//! The session never calls back into its owner. Everything the owner needs
//! to hear about goes out as a [`SessionEvent`] on the channel it was
//! created with.

use crate::config::EngineConfig;
use crate::driver::{DriverEvent, MidiDriver};
use crate::endpoint::{Endpoint, InputSource, OutputDestination, SourceGroup};
use crate::error::Result;
use crate::input::{CombinationInputStream, InputEvent};
use crate::message::{SystemExclusive, TimedMessage};
use crate::output::{CombinationOutputStream, OutputEvent};
use crate::scheduler::{Scheduler, Wakeup};
use crate::sysex::{ReceiveProgress, SendProgress, SysExTransferEngine, TransferEvent};
use crossbeam::channel::Sender;
use log::{debug, info};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};

const INPUT_SETTINGS_KEY: &str = "input";
const OUTPUT_SETTINGS_KEY: &str = "output";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Messages received while not listening for SysEx.
    Messages(Vec<TimedMessage>),
    SourceListChanged,
    DestinationListChanged,
    DestinationDisappeared(Endpoint),
    ReadProgress(ReceiveProgress),
    ReadFinished(Vec<SystemExclusive>),
    SendProgress(SendProgress),
    SendFinished { success: bool, progress: SendProgress },
}

impl From<TransferEvent> for SessionEvent {
    fn from(event: TransferEvent) -> Self {
        match event {
            TransferEvent::ReadProgress(progress) => SessionEvent::ReadProgress(progress),
            TransferEvent::ReadFinished(messages) => SessionEvent::ReadFinished(messages),
            TransferEvent::SendFinished { success, progress } => {
                SessionEvent::SendFinished { success, progress }
            }
        }
    }
}

pub struct MidiSession<D: MidiDriver> {
    driver: D,
    scheduler: Scheduler,
    input: CombinationInputStream,
    output: CombinationOutputStream,
    engine: SysExTransferEngine,
    events: Sender<SessionEvent>,
}

impl<D: MidiDriver> MidiSession<D> {
    pub fn new(mut driver: D, config: &EngineConfig, events: Sender<SessionEvent>) -> Result<Self> {
        let input = CombinationInputStream::new(
            &mut driver,
            &config.client_name,
            config.sysex_timeout(),
            config.spying,
        )?;
        let output = CombinationOutputStream::new(config.client_name.clone(), config.output_options());
        info!("Session started as '{}'", config.client_name);
        Ok(Self {
            driver,
            scheduler: Scheduler::new(),
            input,
            output,
            engine: SysExTransferEngine::new(config.pause_between_messages()),
            events,
        })
    }

    pub fn output(&self) -> &CombinationOutputStream {
        &self.output
    }

    pub fn engine(&self) -> &SysExTransferEngine {
        &self.engine
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Session event dropped; receiver is gone");
        }
    }

    fn emit_transfer(&self, event: Option<TransferEvent>) {
        if let Some(event) = event {
            self.emit(event.into());
        }
    }

    // Sources and destinations

    pub fn source_groups(&self) -> Vec<SourceGroup> {
        self.input.source_groups(&self.driver)
    }

    pub fn all_sources(&self) -> HashSet<InputSource> {
        self.input.all_sources(&self.driver)
    }

    pub fn selected_sources(&self) -> HashSet<InputSource> {
        self.input.selected_sources()
    }

    pub fn set_selected_sources(&mut self, sources: &HashSet<InputSource>) {
        self.input.set_selected_sources(&mut self.driver, sources);
    }

    pub fn destinations(&self) -> Vec<OutputDestination> {
        self.output.destinations(&self.driver)
    }

    pub fn selected_destination(&self) -> Option<OutputDestination> {
        self.output.selected_destination()
    }

    pub fn select_destination(&mut self, destination: OutputDestination) {
        self.output.select(&mut self.driver, destination);
    }

    /// Moves the output to the first destination that is still offered,
    /// after the selected one went away. The virtual source is always last,
    /// so it is the fallback when no hardware is left.
    pub fn select_first_available_destination(&mut self) -> Option<OutputDestination> {
        let current = self.output.selected_destination();
        let next = self
            .destinations()
            .into_iter()
            .find(|destination| Some(destination) != current.as_ref())?;
        info!("Switching output to {}", next);
        self.select_destination(next.clone());
        Some(next)
    }

    /// Sends through the selected destination, or nowhere if there is none.
    pub fn send(&mut self, messages: &[TimedMessage]) {
        self.output.take_messages(&mut self.driver, messages);
    }

    // SysEx transfers

    pub fn listen_for_one_message(&mut self) {
        self.engine
            .listen_for_one_message(&mut self.driver, &mut self.input);
    }

    pub fn listen_for_multiple_messages(&mut self) {
        self.engine
            .listen_for_multiple_messages(&mut self.driver, &mut self.input);
    }

    pub fn cancel_message_listen(&mut self) {
        self.engine.cancel_message_listen(&mut self.input);
    }

    pub fn done_with_multiple_message_listen(&mut self) {
        let event = self
            .engine
            .done_with_multiple_message_listen(&mut self.input);
        self.emit_transfer(event);
    }

    pub fn receive_progress(&self) -> ReceiveProgress {
        self.engine.receive_progress()
    }

    pub fn send_sysex(&mut self, messages: Vec<SystemExclusive>) {
        let event = self
            .engine
            .send_messages(&mut self.driver, &mut self.output, messages);
        self.emit_transfer(event);
    }

    pub fn cancel_sending(&mut self) {
        let event = self.engine.cancel_sending_messages(
            &mut self.driver,
            &mut self.output,
            &mut self.scheduler,
        );
        self.emit_transfer(event);
    }

    pub fn send_progress(&self) -> SendProgress {
        self.engine.send_progress()
    }

    // Persistent settings

    pub fn persistent_settings(&self) -> Value {
        let mut settings = Map::new();
        if let Some(input) = self.input.persistent_settings() {
            settings.insert(INPUT_SETTINGS_KEY.to_string(), input);
        }
        if let Some(output) = self.output.persistent_settings() {
            settings.insert(OUTPUT_SETTINGS_KEY.to_string(), output);
        }
        Value::Object(settings)
    }

    /// Restores both sides; returns the names of whatever could not be found.
    pub fn apply_persistent_settings(&mut self, settings: &Value) -> Vec<String> {
        let mut missing = Vec::new();
        if let Some(input) = settings.get(INPUT_SETTINGS_KEY) {
            missing.extend(self.input.apply_persistent_settings(&mut self.driver, input));
        }
        if let Some(output) = settings.get(OUTPUT_SETTINGS_KEY) {
            missing.extend(self.output.apply_persistent_settings(&mut self.driver, output));
        }
        missing
    }

    // Driving the session

    pub fn handle_driver_event(&mut self, event: DriverEvent, now: Instant) {
        match event {
            DriverEvent::Packet {
                token,
                timestamp,
                data,
            } => {
                for input_event in self.input.take_packet(token, timestamp, &data, now) {
                    self.route_input(input_event);
                }
            }
            DriverEvent::SysExSendProgress {
                request,
                bytes_sent,
            } => {
                self.engine.handle_send_progress(request, bytes_sent);
                if self.engine.is_sending() {
                    self.emit(SessionEvent::SendProgress(self.engine.send_progress()));
                }
            }
            DriverEvent::SysExSendFinished {
                request,
                bytes_sent,
                all_bytes_sent,
            } => {
                let finished = self.engine.handle_send_finished(
                    request,
                    bytes_sent,
                    all_bytes_sent,
                    &mut self.scheduler,
                );
                match finished {
                    Some(event) => self.emit(event.into()),
                    None if self.engine.is_sending() => {
                        self.emit(SessionEvent::SendProgress(self.engine.send_progress()))
                    }
                    None => {}
                }
            }
            DriverEvent::EndpointsChanged
            | DriverEvent::EndpointDisappeared { .. }
            | DriverEvent::EndpointReplaced { .. } => {
                self.input
                    .handle_driver_event(&mut self.driver, &event, &mut self.scheduler);
                match self.output.handle_driver_event(&mut self.driver, &event) {
                    Some(OutputEvent::DestinationListChanged) => {
                        self.emit(SessionEvent::DestinationListChanged)
                    }
                    Some(OutputEvent::DestinationDisappeared(endpoint)) => {
                        self.emit(SessionEvent::DestinationDisappeared(endpoint))
                    }
                    None => {}
                }
            }
        }
    }

    fn route_input(&mut self, event: InputEvent) {
        if let InputEvent::SourceListChanged = event {
            self.emit(SessionEvent::SourceListChanged);
            return;
        }
        if self.engine.is_listening() {
            for transfer_event in self.engine.take_input_event(&event, &mut self.scheduler) {
                self.emit(transfer_event.into());
            }
        } else if let InputEvent::Messages(messages) = event {
            self.emit(SessionEvent::Messages(messages));
        }
    }

    /// How long the owner may wait before calling [`Self::run_due`].
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.scheduler.time_until_due(now)
    }

    /// Handles every wakeup due at `now`, including ones scheduled while
    /// doing so.
    pub fn run_due(&mut self, now: Instant) {
        loop {
            let due = self.scheduler.take_due(now);
            if due.is_empty() {
                return;
            }
            for wakeup in due {
                self.handle_wakeup(wakeup, now);
            }
        }
    }

    fn handle_wakeup(&mut self, wakeup: Wakeup, now: Instant) {
        match wakeup {
            Wakeup::SourceListChanged => {
                if let Some(event) = self.input.flush_source_list_changed() {
                    self.route_input(event);
                }
            }
            Wakeup::SendNextMessage => {
                let event = self.engine.handle_wakeup(
                    wakeup,
                    &mut self.driver,
                    &mut self.output,
                    &mut self.scheduler,
                    now,
                );
                match event {
                    Some(event) => self.emit(event.into()),
                    None if self.engine.is_sending() => {
                        self.emit(SessionEvent::SendProgress(self.engine.send_progress()))
                    }
                    None => {}
                }
            }
            _ => {
                let event = self.engine.handle_wakeup(
                    wakeup,
                    &mut self.driver,
                    &mut self.output,
                    &mut self.scheduler,
                    now,
                );
                self.emit_transfer(event);
            }
        }
    }

    /// Periodic housekeeping: endpoint rescan and SysEx receive timeouts.
    pub fn idle(&mut self, now: Instant) {
        self.driver.rescan();
        for event in self.input.check_sysex_timeouts(now) {
            self.route_input(event);
        }
    }

    pub fn close(&mut self) {
        self.cancel_sending();
        self.engine.cancel_message_listen(&mut self.input);
        self.input.close(&mut self.driver);
        self.output.close(&mut self.driver);
        info!("Session closed");
    }
}
