use super::{InputStream, PortInputStream, SavedEndpoints, SpyAttachmentManager, VirtualInputStream};
use crate::driver::{ConnectionToken, DriverEvent, MidiDriver};
use crate::endpoint::{InputSource, ProviderKind, SourceGroup};
use crate::error::Result;
use crate::message::TimedMessage;
use crate::parser::{MessageParser, ParsedEvent};
use crate::scheduler::{Scheduler, Wakeup};
use log::{debug, trace};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// What the input side hands to its single downstream consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Parsed messages, in the order one provider delivered them. Messages
    /// from different providers carry no ordering guarantee.
    Messages(Vec<TimedMessage>),
    ReadingSysEx { bytes_read: usize },
    /// Coalesced: at most one per pass of the loop.
    SourceListChanged,
}

/// One source list and one message stream over the port, virtual and
/// (if the driver can spy) spy providers.
///
/// The selection lives only in the providers and is always narrowed to
/// what they offer at the time it is set.
pub struct CombinationInputStream {
    port: PortInputStream,
    virtual_stream: VirtualInputStream,
    spy: Option<SpyAttachmentManager>,
    source_list_change_pending: bool,
}

impl CombinationInputStream {
    pub fn new(
        driver: &mut dyn MidiDriver,
        virtual_name: &str,
        sysex_timeout: Duration,
        spying: bool,
    ) -> Result<Self> {
        let virtual_stream = VirtualInputStream::new(driver, virtual_name, sysex_timeout)?;
        let spy = if spying && driver.supports_spying() {
            Some(SpyAttachmentManager::new(sysex_timeout))
        } else {
            debug!("Spying unavailable");
            None
        };
        Ok(Self {
            port: PortInputStream::new(sysex_timeout),
            virtual_stream,
            spy,
            source_list_change_pending: false,
        })
    }

    fn streams(&self) -> Vec<&dyn InputStream> {
        let mut streams: Vec<&dyn InputStream> = vec![&self.port, &self.virtual_stream];
        if let Some(spy) = self.spy.as_ref() {
            streams.push(spy);
        }
        streams
    }

    fn streams_mut(&mut self) -> Vec<&mut dyn InputStream> {
        let mut streams: Vec<&mut dyn InputStream> = vec![&mut self.port, &mut self.virtual_stream];
        if let Some(spy) = self.spy.as_mut() {
            streams.push(spy);
        }
        streams
    }

    pub fn virtual_source(&self) -> InputSource {
        self.virtual_stream.source()
    }

    /// Port, virtual, then spy.
    pub fn source_groups(&self, driver: &dyn MidiDriver) -> Vec<SourceGroup> {
        self.streams()
            .into_iter()
            .map(|s| s.source_group(driver))
            .collect()
    }

    pub fn all_sources(&self, driver: &dyn MidiDriver) -> HashSet<InputSource> {
        self.streams()
            .into_iter()
            .flat_map(|s| s.sources(driver))
            .collect()
    }

    pub fn selected_sources(&self) -> HashSet<InputSource> {
        self.streams()
            .into_iter()
            .flat_map(|s| s.selected_sources())
            .collect()
    }

    /// Applies `sources` to every provider, each narrowed to what that
    /// provider offers now. Anything else is dropped without complaint.
    pub fn set_selected_sources(
        &mut self,
        driver: &mut dyn MidiDriver,
        sources: &HashSet<InputSource>,
    ) {
        for stream in self.streams_mut() {
            let offered: HashSet<InputSource> = stream.sources(driver).into_iter().collect();
            let subset: HashSet<InputSource> = sources.intersection(&offered).cloned().collect();
            stream.set_selected_sources(driver, &subset);
        }
    }

    fn parser_for(&mut self, token: ConnectionToken) -> Option<&mut MessageParser> {
        if self.port.owns(token) {
            return self.port.parser_mut(token);
        }
        if self.virtual_stream.owns(token) {
            return self.virtual_stream.parser_mut(token);
        }
        match self.spy.as_mut() {
            Some(spy) if spy.owns(token) => spy.parser_mut(token),
            _ => None,
        }
    }

    /// Parses a packet from whichever provider owns `token`.
    pub fn take_packet(
        &mut self,
        token: ConnectionToken,
        timestamp: u64,
        data: &[u8],
        now: Instant,
    ) -> Vec<InputEvent> {
        let Some(parser) = self.parser_for(token) else {
            // The connection was closed after the packet was queued.
            trace!("Dropping packet for inactive connection {:?}", token);
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut messages = Vec::new();
        for parsed in parser.feed(timestamp, data, now) {
            match parsed {
                ParsedEvent::Message(message) => messages.push(message),
                ParsedEvent::ReadingSysEx { bytes_read } => {
                    if !messages.is_empty() {
                        events.push(InputEvent::Messages(std::mem::take(&mut messages)));
                    }
                    events.push(InputEvent::ReadingSysEx { bytes_read });
                }
            }
        }
        if !messages.is_empty() {
            events.push(InputEvent::Messages(messages));
        }
        events
    }

    /// Applies endpoint churn reported by the driver.
    pub fn handle_driver_event(
        &mut self,
        driver: &mut dyn MidiDriver,
        event: &DriverEvent,
        scheduler: &mut Scheduler,
    ) {
        let changed = match *event {
            DriverEvent::EndpointsChanged => true,
            DriverEvent::EndpointDisappeared { endpoint } => {
                let mut changed = false;
                for stream in self.streams_mut() {
                    changed |= stream.endpoint_disappeared(driver, endpoint);
                }
                changed
            }
            DriverEvent::EndpointReplaced { old, new } => {
                let mut changed = false;
                for stream in self.streams_mut() {
                    changed |= stream.endpoint_replaced(driver, old, new);
                }
                changed
            }
            _ => false,
        };
        if changed {
            self.note_source_list_changed(scheduler);
        }
    }

    fn note_source_list_changed(&mut self, scheduler: &mut Scheduler) {
        if !self.source_list_change_pending {
            self.source_list_change_pending = true;
            scheduler.defer(Wakeup::SourceListChanged);
        }
    }

    /// Called for [`Wakeup::SourceListChanged`].
    pub fn flush_source_list_changed(&mut self) -> Option<InputEvent> {
        if self.source_list_change_pending {
            self.source_list_change_pending = false;
            Some(InputEvent::SourceListChanged)
        } else {
            None
        }
    }

    /// Discards partial SysEx in every parser.
    pub fn cancel_received_sysex(&mut self) {
        for stream in self.streams_mut() {
            for parser in stream.parsers_mut() {
                parser.cancel_received_sysex();
            }
        }
    }

    pub fn check_sysex_timeouts(&mut self, now: Instant) -> Vec<InputEvent> {
        let mut events = Vec::new();
        for stream in self.streams_mut() {
            let expired: Vec<TimedMessage> = stream
                .parsers_mut()
                .into_iter()
                .filter_map(|parser| parser.check_timeout(now))
                .collect();
            if !expired.is_empty() {
                events.push(InputEvent::Messages(expired));
            }
        }
        events
    }

    /// One sub-dictionary per provider with something selected.
    pub fn persistent_settings(&self) -> Option<Value> {
        let map: Map<String, Value> = self
            .streams()
            .into_iter()
            .filter_map(|s| {
                s.persistent_settings()
                    .map(|v| (s.kind().settings_key().to_string(), v))
            })
            .collect();
        if map.is_empty() {
            None
        } else {
            Some(Value::Object(map))
        }
    }

    /// Restores every provider independently. Providers absent from the
    /// settings end up with nothing selected. Returns the names of
    /// endpoints that could not be found anywhere.
    pub fn apply_persistent_settings(
        &mut self,
        driver: &mut dyn MidiDriver,
        settings: &Value,
    ) -> Vec<String> {
        let empty = Value::Object(Map::new());
        let mut missing = Vec::new();

        for stream in self.streams_mut() {
            match settings.get(stream.kind().settings_key()) {
                Some(stream_settings) => {
                    missing.extend(stream.apply_persistent_settings(driver, stream_settings));
                }
                None => {
                    stream.apply_persistent_settings(driver, &empty);
                }
            }
        }

        if self.spy.is_none() {
            if let Some(spy_settings) = settings.get(ProviderKind::Spy.settings_key()) {
                let saved = SavedEndpoints::parse(spy_settings);
                missing.extend(saved.endpoints.iter().map(|e| e.display_name()));
            }
        }

        if !missing.is_empty() {
            debug!("Could not restore inputs: {:?}", missing);
        }
        missing
    }

    /// Disconnects everything and disposes the virtual destination.
    pub fn close(&mut self, driver: &mut dyn MidiDriver) {
        self.port.close(driver);
        if let Some(spy) = self.spy.as_mut() {
            spy.close(driver);
        }
        self.virtual_stream.close(driver);
    }
}
