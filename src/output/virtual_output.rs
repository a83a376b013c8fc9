use crate::driver::MidiDriver;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::message::TimedMessage;
use log::{error, info, warn};

/// A source we host; other programs receive whatever we send through it.
pub struct VirtualOutputStream {
    endpoint: Endpoint,
}

impl VirtualOutputStream {
    pub fn open(driver: &mut dyn MidiDriver, name: &str) -> Result<Self> {
        let endpoint = driver.create_virtual_source(name)?;
        info!("Created virtual source '{}' ({})", endpoint.name, endpoint.id);
        Ok(Self { endpoint })
    }

    pub fn take_messages(&mut self, driver: &mut dyn MidiDriver, messages: &[TimedMessage]) {
        for message in messages {
            if let Err(e) = driver.send(self.endpoint.id, None, &message.message.to_bytes()) {
                error!("Failed to send through virtual source: {}", e);
            }
        }
    }

    pub fn close(self, driver: &mut dyn MidiDriver) {
        if let Err(e) = driver.dispose_virtual(self.endpoint.id) {
            warn!("Failed to dispose virtual source: {}", e);
        }
    }
}
