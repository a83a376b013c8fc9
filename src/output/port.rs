use super::OutputOptions;
use crate::driver::{MidiDriver, SendRequestId};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::message::{SystemExclusive, TimedMessage};
use log::{debug, error};

/// Sends to a single destination endpoint.
pub struct PortOutputStream {
    destination: Endpoint,
    options: OutputOptions,
}

impl PortOutputStream {
    pub fn new(destination: Endpoint, options: OutputOptions) -> Self {
        debug!("Port output to {}", destination.name);
        Self {
            destination,
            options,
        }
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    pub fn set_destination(&mut self, destination: Endpoint) {
        debug!("Port output now sends to {}", destination.name);
        self.destination = destination;
    }

    pub fn set_options(&mut self, options: OutputOptions) {
        self.options = options;
    }

    pub fn can_send_sysex_async(&self) -> bool {
        self.options.sends_sysex_async
    }

    pub fn take_messages(&mut self, driver: &mut dyn MidiDriver, messages: &[TimedMessage]) {
        for message in messages {
            let timestamp = if self.options.ignores_timestamps {
                None
            } else {
                Some(message.timestamp)
            };
            if let Err(e) = driver.send(self.destination.id, timestamp, &message.message.to_bytes()) {
                error!("Failed to send to {}: {}", self.destination.name, e);
            }
        }
    }

    pub fn send_sysex_async(
        &mut self,
        driver: &mut dyn MidiDriver,
        sysex: &SystemExclusive,
    ) -> Result<SendRequestId> {
        driver.begin_sysex_send(
            self.destination.id,
            sysex.to_bytes(),
            self.options.buffer_size(),
        )
    }

    pub fn cancel_sysex_send(&mut self, driver: &mut dyn MidiDriver, request: SendRequestId) {
        driver.cancel_sysex_send(request);
    }
}
