//! Streaming packet parser.
//!
//! One parser exists per connection, so running status and a SysEx message
//! spanning several packets never mix between sources.

use crate::message::{MidiMessage, SystemExclusive, TimedMessage, SYSEX_END, SYSEX_START};
use log::{debug, trace};
use std::time::{Duration, Instant};

/// Something the parser produced from a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Message(TimedMessage),
    /// An unfinished SysEx grew; `bytes_read` counts the `F0` too.
    ReadingSysEx { bytes_read: usize },
}

#[derive(Debug)]
struct PendingSysEx {
    timestamp: u64,
    data: Vec<u8>,
    last_activity: Instant,
}

#[derive(Debug)]
pub struct MessageParser {
    sysex_timeout: Duration,
    sysex: Option<PendingSysEx>,
    running_status: Option<u8>,
    pending: Vec<u8>,
    pending_timestamp: u64,
}

fn expected_length(status: u8) -> usize {
    match status {
        0x80..=0xBF | 0xE0..=0xEF | 0xF2 => 3,
        0xC0..=0xDF | 0xF1 | 0xF3 => 2,
        _ => 1,
    }
}

impl MessageParser {
    pub fn new(sysex_timeout: Duration) -> Self {
        Self {
            sysex_timeout,
            sysex: None,
            running_status: None,
            pending: Vec::with_capacity(3),
            pending_timestamp: 0,
        }
    }

    pub fn is_reading_sysex(&self) -> bool {
        self.sysex.is_some()
    }

    /// Parses one packet. `now` is used only for the SysEx idle timeout.
    pub fn feed(&mut self, timestamp: u64, data: &[u8], now: Instant) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        let sysex_len_before = self.sysex.as_ref().map(|s| s.data.len());

        for &byte in data {
            self.feed_byte(timestamp, byte, &mut events);
        }

        if let Some(sysex) = self.sysex.as_mut() {
            sysex.last_activity = now;
            if sysex_len_before != Some(sysex.data.len()) {
                events.push(ParsedEvent::ReadingSysEx {
                    bytes_read: sysex.data.len() + 1,
                });
            }
        }

        events
    }

    fn feed_byte(&mut self, timestamp: u64, byte: u8, events: &mut Vec<ParsedEvent>) {
        match byte {
            // Real-time bytes may appear anywhere, even inside SysEx.
            0xF8..=0xFF => {
                let message = MidiMessage::parse(&[byte]).unwrap_or(MidiMessage::Invalid(vec![byte]));
                events.push(ParsedEvent::Message(TimedMessage::new(timestamp, message)));
            }
            SYSEX_START => {
                self.finish_sysex(false, events);
                self.discard_pending(events);
                self.running_status = None;
                self.sysex = Some(PendingSysEx {
                    timestamp,
                    data: Vec::new(),
                    last_activity: Instant::now(),
                });
            }
            SYSEX_END => {
                if self.sysex.is_some() {
                    self.finish_sysex(true, events);
                } else {
                    debug!("Stray end of exclusive byte");
                    events.push(ParsedEvent::Message(TimedMessage::new(
                        timestamp,
                        MidiMessage::Invalid(vec![byte]),
                    )));
                }
            }
            0x80..=0xF6 => {
                self.finish_sysex(false, events);
                self.discard_pending(events);
                self.running_status = if byte < 0xF0 { Some(byte) } else { None };
                self.pending_timestamp = timestamp;
                self.pending.push(byte);
                self.complete_pending_if_ready(events);
            }
            _ => {
                if let Some(sysex) = self.sysex.as_mut() {
                    sysex.data.push(byte);
                } else if !self.pending.is_empty() {
                    self.pending.push(byte);
                    self.complete_pending_if_ready(events);
                } else if let Some(status) = self.running_status {
                    self.pending_timestamp = timestamp;
                    self.pending.push(status);
                    self.pending.push(byte);
                    self.complete_pending_if_ready(events);
                } else {
                    trace!("Data byte {:02X} without status", byte);
                    events.push(ParsedEvent::Message(TimedMessage::new(
                        timestamp,
                        MidiMessage::Invalid(vec![byte]),
                    )));
                }
            }
        }
    }

    fn complete_pending_if_ready(&mut self, events: &mut Vec<ParsedEvent>) {
        let status = self.pending[0];
        if self.pending.len() < expected_length(status) {
            return;
        }
        let message = MidiMessage::parse(&self.pending)
            .unwrap_or_else(|| MidiMessage::Invalid(self.pending.clone()));
        self.pending.clear();
        events.push(ParsedEvent::Message(TimedMessage::new(
            self.pending_timestamp,
            message,
        )));
    }

    fn discard_pending(&mut self, events: &mut Vec<ParsedEvent>) {
        if self.pending.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.pending);
        events.push(ParsedEvent::Message(TimedMessage::new(
            self.pending_timestamp,
            MidiMessage::Invalid(bytes),
        )));
    }

    fn finish_sysex(&mut self, received_with_eox: bool, events: &mut Vec<ParsedEvent>) {
        if let Some(pending) = self.sysex.take() {
            if !received_with_eox {
                debug!(
                    "SysEx ended without F7 after {} data bytes",
                    pending.data.len()
                );
            }
            let sysex = SystemExclusive {
                data: pending.data,
                received_with_eox,
            };
            events.push(ParsedEvent::Message(TimedMessage::new(
                pending.timestamp,
                sysex.into(),
            )));
        }
    }

    /// Drops a partially received SysEx message without delivering it.
    pub fn cancel_received_sysex(&mut self) {
        if let Some(pending) = self.sysex.take() {
            debug!("Discarding {} partial SysEx bytes", pending.data.len() + 1);
        }
    }

    /// Ends a SysEx message that has been idle longer than the timeout and
    /// returns it, marked as incomplete.
    pub fn check_timeout(&mut self, now: Instant) -> Option<TimedMessage> {
        let expired = self
            .sysex
            .as_ref()
            .is_some_and(|s| now.saturating_duration_since(s.last_activity) >= self.sysex_timeout);
        if !expired {
            return None;
        }

        let mut events = Vec::with_capacity(1);
        self.finish_sysex(false, &mut events);
        events.into_iter().find_map(|event| match event {
            ParsedEvent::Message(message) => Some(message),
            ParsedEvent::ReadingSysEx { .. } => None,
        })
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(events: &[ParsedEvent]) -> Vec<MidiMessage> {
        events
            .iter()
            .filter_map(|e| match e {
                ParsedEvent::Message(m) => Some(m.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_running_status() {
        let mut parser = MessageParser::default();
        let events = parser.feed(0, &[0x90, 60, 100, 62, 90], Instant::now());
        assert_eq!(
            messages(&events),
            vec![
                MidiMessage::NoteOn {
                    channel: 0,
                    note: 60,
                    velocity: 100
                },
                MidiMessage::NoteOn {
                    channel: 0,
                    note: 62,
                    velocity: 90
                },
            ]
        );
    }

    #[test]
    fn test_channel_message_split_across_packets() {
        let mut parser = MessageParser::default();
        let now = Instant::now();
        assert!(parser.feed(1, &[0xB0, 7], now).is_empty());
        let events = parser.feed(2, &[100], now);
        assert_eq!(
            messages(&events),
            vec![MidiMessage::ControlChange {
                channel: 0,
                controller: 7,
                value: 100
            }]
        );
    }

    #[test]
    fn test_sysex_across_packets_reports_progress() {
        let mut parser = MessageParser::default();
        let now = Instant::now();

        let events = parser.feed(10, &[0xF0, 0x41, 0x10], now);
        assert_eq!(events, vec![ParsedEvent::ReadingSysEx { bytes_read: 3 }]);
        assert!(parser.is_reading_sysex());

        let events = parser.feed(11, &[0x42, 0x12, 0xF7], now);
        assert_eq!(
            events,
            vec![ParsedEvent::Message(TimedMessage::new(
                10,
                MidiMessage::SystemExclusive(SystemExclusive::new(vec![0x41, 0x10, 0x42, 0x12]))
            ))]
        );
        assert!(!parser.is_reading_sysex());
    }

    #[test]
    fn test_realtime_inside_sysex() {
        let mut parser = MessageParser::default();
        let events = parser.feed(0, &[0xF0, 0x7E, 0xF8, 0x01, 0xF7], Instant::now());
        assert_eq!(
            messages(&events),
            vec![
                MidiMessage::Clock,
                MidiMessage::SystemExclusive(SystemExclusive::new(vec![0x7E, 0x01])),
            ]
        );
    }

    #[test]
    fn test_status_byte_terminates_sysex() {
        let mut parser = MessageParser::default();
        let events = parser.feed(0, &[0xF0, 0x7E, 0x01, 0x90, 60, 1], Instant::now());
        let msgs = messages(&events);
        assert_eq!(msgs.len(), 2);
        let sysex = msgs[0].as_sysex().unwrap();
        assert!(!sysex.received_with_eox);
        assert_eq!(sysex.data, vec![0x7E, 0x01]);
    }

    #[test]
    fn test_cancel_received_sysex() {
        let mut parser = MessageParser::default();
        let now = Instant::now();
        parser.feed(0, &[0xF0, 0x01, 0x02], now);
        parser.cancel_received_sysex();
        let events = parser.feed(0, &[0x03, 0xF7], now);
        assert_eq!(messages(&events), vec![MidiMessage::Invalid(vec![0x03]), MidiMessage::Invalid(vec![0xF7])]);
    }

    #[test]
    fn test_sysex_timeout() {
        let mut parser = MessageParser::new(Duration::from_millis(100));
        let start = Instant::now();
        parser.feed(5, &[0xF0, 0x01], start);

        assert!(parser.check_timeout(start + Duration::from_millis(50)).is_none());
        let timed_out = parser
            .check_timeout(start + Duration::from_millis(150))
            .expect("partial sysex should time out");
        assert_eq!(timed_out.timestamp, 5);
        assert_eq!(
            timed_out.message,
            MidiMessage::SystemExclusive(SystemExclusive {
                data: vec![0x01],
                received_with_eox: false
            })
        );
        assert!(parser.check_timeout(start + Duration::from_secs(5)).is_none());
    }
}
