//! Typed MIDI messages

use std::fmt;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// A System Exclusive message.
///
/// `data` holds the bytes between `F0` and `F7`. Messages cut short by a
/// timeout or an unexpected status byte have `received_with_eox == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemExclusive {
    pub data: Vec<u8>,
    pub received_with_eox: bool,
}

impl SystemExclusive {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            received_with_eox: true,
        }
    }

    /// Builds a message from its complete wire form, `F0 ... F7`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [SYSEX_START, body @ .., SYSEX_END] if body.iter().all(|b| *b < 0x80) => {
                Some(Self::new(body.to_vec()))
            }
            _ => None,
        }
    }

    /// Size on the wire, counting `F0` and, if present, `F7`.
    pub fn len(&self) -> usize {
        self.data.len() + if self.received_with_eox { 2 } else { 1 }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.push(SYSEX_START);
        bytes.extend_from_slice(&self.data);
        if self.received_with_eox {
            bytes.push(SYSEX_END);
        }
        bytes
    }

    /// One-byte manufacturer ID, or the three-byte extended form (`00 xx yy`).
    pub fn manufacturer_id(&self) -> Option<&[u8]> {
        match self.data.first() {
            None => None,
            Some(0x00) if self.data.len() >= 3 => Some(&self.data[..3]),
            Some(0x00) => None,
            Some(_) => Some(&self.data[..1]),
        }
    }
}

/// Represents a MIDI message that can be sent or received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// 14-bit value, 0x2000 is centre
    PitchBend { channel: u8, value: u16 },
    TimeCodeQuarterFrame(u8),
    SongPosition(u16),
    SongSelect(u8),
    TuneRequest,
    Clock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
    SystemExclusive(SystemExclusive),
    /// Bytes that could not be interpreted, kept so a monitor can show them
    Invalid(Vec<u8>),
}

impl MidiMessage {
    /// Parses one complete, non-SysEx message. SysEx goes through
    /// [`SystemExclusive::from_bytes`] or the streaming parser.
    pub fn parse(data: &[u8]) -> Option<MidiMessage> {
        let status = *data.first()?;
        let channel = status & 0x0F;
        let d1 = data.get(1).copied();
        let d2 = data.get(2).copied();

        match (status & 0xF0, d1, d2) {
            (0x80, Some(note), Some(velocity)) => Some(MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            }),
            (0x90, Some(note), Some(velocity)) => Some(MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            }),
            (0xA0, Some(note), Some(pressure)) => Some(MidiMessage::PolyPressure {
                channel,
                note,
                pressure,
            }),
            (0xB0, Some(controller), Some(value)) => Some(MidiMessage::ControlChange {
                channel,
                controller,
                value,
            }),
            (0xC0, Some(program), _) => Some(MidiMessage::ProgramChange { channel, program }),
            (0xD0, Some(pressure), _) => Some(MidiMessage::ChannelPressure { channel, pressure }),
            (0xE0, Some(lsb), Some(msb)) => Some(MidiMessage::PitchBend {
                channel,
                value: (u16::from(msb) << 7) | u16::from(lsb),
            }),
            (0xF0, _, _) => match (status, d1, d2) {
                (0xF1, Some(value), _) => Some(MidiMessage::TimeCodeQuarterFrame(value)),
                (0xF2, Some(lsb), Some(msb)) => {
                    Some(MidiMessage::SongPosition((u16::from(msb) << 7) | u16::from(lsb)))
                }
                (0xF3, Some(song), _) => Some(MidiMessage::SongSelect(song)),
                (0xF6, _, _) => Some(MidiMessage::TuneRequest),
                (0xF8, _, _) => Some(MidiMessage::Clock),
                (0xFA, _, _) => Some(MidiMessage::Start),
                (0xFB, _, _) => Some(MidiMessage::Continue),
                (0xFC, _, _) => Some(MidiMessage::Stop),
                (0xFE, _, _) => Some(MidiMessage::ActiveSensing),
                (0xFF, _, _) => Some(MidiMessage::SystemReset),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | (channel & 0x0F), *note, *velocity],
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), *note, *velocity],
            MidiMessage::PolyPressure {
                channel,
                note,
                pressure,
            } => vec![0xA0 | (channel & 0x0F), *note, *pressure],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0F), *controller, *value],
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), *program]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), *pressure]
            }
            MidiMessage::PitchBend { channel, value } => vec![
                0xE0 | (channel & 0x0F),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            MidiMessage::TimeCodeQuarterFrame(value) => vec![0xF1, *value],
            MidiMessage::SongPosition(position) => vec![
                0xF2,
                (position & 0x7F) as u8,
                ((position >> 7) & 0x7F) as u8,
            ],
            MidiMessage::SongSelect(song) => vec![0xF3, *song],
            MidiMessage::TuneRequest => vec![0xF6],
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::ActiveSensing => vec![0xFE],
            MidiMessage::SystemReset => vec![0xFF],
            MidiMessage::SystemExclusive(sysex) => sysex.to_bytes(),
            MidiMessage::Invalid(bytes) => bytes.clone(),
        }
    }

    /// Byte length on the wire
    pub fn len(&self) -> usize {
        match self {
            MidiMessage::SystemExclusive(sysex) => sysex.len(),
            MidiMessage::Invalid(bytes) => bytes.len(),
            MidiMessage::ProgramChange { .. }
            | MidiMessage::ChannelPressure { .. }
            | MidiMessage::TimeCodeQuarterFrame(_)
            | MidiMessage::SongSelect(_) => 2,
            MidiMessage::TuneRequest
            | MidiMessage::Clock
            | MidiMessage::Start
            | MidiMessage::Continue
            | MidiMessage::Stop
            | MidiMessage::ActiveSensing
            | MidiMessage::SystemReset => 1,
            _ => 3,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, MidiMessage::Invalid(_))
    }

    pub fn as_sysex(&self) -> Option<&SystemExclusive> {
        match self {
            MidiMessage::SystemExclusive(sysex) => Some(sysex),
            _ => None,
        }
    }

    pub fn into_sysex(self) -> Option<SystemExclusive> {
        match self {
            MidiMessage::SystemExclusive(sysex) => Some(sysex),
            _ => None,
        }
    }
}

impl From<SystemExclusive> for MidiMessage {
    fn from(sysex: SystemExclusive) -> Self {
        MidiMessage::SystemExclusive(sysex)
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => write!(f, "Note Off    ch {:2}  note {:3}  vel {:3}", channel + 1, note, velocity),
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "Note On     ch {:2}  note {:3}  vel {:3}", channel + 1, note, velocity),
            MidiMessage::PolyPressure {
                channel,
                note,
                pressure,
            } => write!(f, "Aftertouch  ch {:2}  note {:3}  val {:3}", channel + 1, note, pressure),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "Control     ch {:2}  cc {:5}  val {:3}", channel + 1, controller, value),
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "Program     ch {:2}  program {}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "Pressure    ch {:2}  val {}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "Pitch Bend  ch {:2}  val {}", channel + 1, *value as i32 - 0x2000)
            }
            MidiMessage::TimeCodeQuarterFrame(value) => write!(f, "MTC Quarter Frame {:02X}", value),
            MidiMessage::SongPosition(position) => write!(f, "Song Position {}", position),
            MidiMessage::SongSelect(song) => write!(f, "Song Select {}", song),
            MidiMessage::TuneRequest => f.write_str("Tune Request"),
            MidiMessage::Clock => f.write_str("Clock"),
            MidiMessage::Start => f.write_str("Start"),
            MidiMessage::Continue => f.write_str("Continue"),
            MidiMessage::Stop => f.write_str("Stop"),
            MidiMessage::ActiveSensing => f.write_str("Active Sensing"),
            MidiMessage::SystemReset => f.write_str("Reset"),
            MidiMessage::SystemExclusive(sysex) => {
                write!(f, "SysEx       {} bytes", sysex.len())?;
                if !sysex.received_with_eox {
                    f.write_str(" (incomplete)")?;
                }
                Ok(())
            }
            MidiMessage::Invalid(bytes) => write!(f, "Invalid     {:02X?}", bytes),
        }
    }
}

/// A message together with the host timestamp (microseconds) it arrived at
/// or should be sent at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedMessage {
    pub timestamp: u64,
    pub message: MidiMessage,
}

impl TimedMessage {
    pub fn new(timestamp: u64, message: MidiMessage) -> Self {
        Self { timestamp, message }
    }

    pub fn now(message: MidiMessage) -> Self {
        Self::new(0, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_parsing() {
        assert_eq!(MidiMessage::parse(&[0xF8]), Some(MidiMessage::Clock));
        assert_eq!(MidiMessage::parse(&[0xFA]), Some(MidiMessage::Start));
        assert_eq!(MidiMessage::parse(&[0xFC]), Some(MidiMessage::Stop));
        assert_eq!(MidiMessage::parse(&[0xFB]), Some(MidiMessage::Continue));
        assert_eq!(
            MidiMessage::parse(&[0xF2, 0x01, 0x02]),
            Some(MidiMessage::SongPosition(0x101))
        );
        assert_eq!(MidiMessage::parse(&[0xF4]), None);
    }

    #[test]
    fn test_channel_message_parsing() {
        assert_eq!(
            MidiMessage::parse(&[0x93, 60, 100]),
            Some(MidiMessage::NoteOn {
                channel: 3,
                note: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiMessage::parse(&[0xE0, 0x00, 0x40]),
            Some(MidiMessage::PitchBend {
                channel: 0,
                value: 0x2000
            })
        );
        assert_eq!(MidiMessage::parse(&[0x90, 60]), None);
    }

    #[test]
    fn test_pitch_bend_bytes() {
        let msg = MidiMessage::PitchBend {
            channel: 1,
            value: 0x3FFF,
        };
        assert_eq!(msg.to_bytes(), vec![0xE1, 0x7F, 0x7F]);
        assert_eq!(msg.len(), 3);
    }

    #[test]
    fn test_sysex_length_counts_framing() {
        let complete = SystemExclusive::new(vec![0x41, 0x10, 0x42]);
        assert_eq!(complete.len(), 5);
        assert_eq!(complete.to_bytes(), vec![0xF0, 0x41, 0x10, 0x42, 0xF7]);

        let cut_short = SystemExclusive {
            data: vec![0x41, 0x10],
            received_with_eox: false,
        };
        assert_eq!(cut_short.len(), 3);
        assert_eq!(cut_short.to_bytes(), vec![0xF0, 0x41, 0x10]);
    }

    #[test]
    fn test_sysex_from_bytes_rejects_bad_framing() {
        assert!(SystemExclusive::from_bytes(&[0xF0, 0x7E, 0xF7]).is_some());
        assert!(SystemExclusive::from_bytes(&[0xF0, 0x7E]).is_none());
        assert!(SystemExclusive::from_bytes(&[0xF0, 0x90, 0xF7]).is_none());
    }

    #[test]
    fn test_manufacturer_id() {
        let roland = SystemExclusive::new(vec![0x41, 0x10]);
        assert_eq!(roland.manufacturer_id(), Some(&[0x41][..]));

        let extended = SystemExclusive::new(vec![0x00, 0x20, 0x33, 0x01]);
        assert_eq!(extended.manufacturer_id(), Some(&[0x00, 0x20, 0x33][..]));

        assert_eq!(SystemExclusive::new(vec![]).manufacturer_id(), None);
    }
}
