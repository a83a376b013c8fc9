//! Reading and writing `.syx` files: raw SysEx messages stored back to back.

use crate::error::{MidiplexError, Result};
use crate::message::{SystemExclusive, SYSEX_END, SYSEX_START};
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Splits raw bytes into SysEx messages. Bytes outside `F0 .. F7` are
/// skipped; an unterminated message at the end is dropped.
pub fn parse_messages(bytes: &[u8]) -> Vec<SystemExclusive> {
    let mut messages = Vec::new();
    let mut current: Option<Vec<u8>> = None;

    for &byte in bytes {
        match byte {
            SYSEX_START => {
                if current.is_some() {
                    debug!("SysEx restarted before its end byte");
                }
                current = Some(Vec::new());
            }
            SYSEX_END => {
                if let Some(data) = current.take() {
                    messages.push(SystemExclusive::new(data));
                }
            }
            data if data < 0x80 => {
                if let Some(body) = current.as_mut() {
                    body.push(data);
                }
            }
            // Real-time bytes may sit inside a message; other status bytes end it.
            0xF8..=0xFF => {}
            _ => {
                if current.take().is_some() {
                    debug!("Dropping SysEx interrupted by status byte {:#04x}", byte);
                }
            }
        }
    }
    if current.is_some() {
        debug!("Dropping unterminated SysEx at end of data");
    }
    messages
}

pub fn read_file(path: &Path) -> Result<Vec<SystemExclusive>> {
    let bytes = fs::read(path)?;
    let messages = parse_messages(&bytes);
    if messages.is_empty() {
        return Err(MidiplexError::InvalidSysEx(format!(
            "no SysEx messages in {}",
            path.display()
        )));
    }
    info!("Read {} messages from {}", messages.len(), path.display());
    Ok(messages)
}

/// Every message is stored terminated, including ones that were received
/// without their end byte, so the file reads back the same messages.
pub fn to_bytes(messages: &[SystemExclusive]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(messages.iter().map(|m| m.data.len() + 2).sum());
    for message in messages {
        bytes.push(SYSEX_START);
        bytes.extend_from_slice(&message.data);
        bytes.push(SYSEX_END);
    }
    bytes
}

pub fn write_file(path: &Path, messages: &[SystemExclusive]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let incomplete = messages.iter().filter(|m| !m.received_with_eox).count();
    if incomplete > 0 {
        warn!(
            "{} of {} messages arrived without an end byte; storing them terminated",
            incomplete,
            messages.len()
        );
    }
    fs::write(path, to_bytes(messages))?;
    info!("Wrote {} messages to {}", messages.len(), path.display());
    Ok(())
}

/// A file name for messages received at `time`.
pub fn received_file_name(time: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("Received {}.syx", time.format("%Y-%m-%d %H.%M.%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_skips_stray_bytes() {
        let bytes = [
            0x90, 0x40, 0x7F, // note on
            0xF0, 0x43, 0x10, 0xF7, // one message
            0x12, // stray data
            0xF0, 0x7E, 0xF8, 0x01, 0xF7, // clock inside a message
            0xF0, 0x01, // unterminated
        ];
        let messages = parse_messages(&bytes);
        assert_eq!(
            messages,
            vec![
                SystemExclusive::new(vec![0x43, 0x10]),
                SystemExclusive::new(vec![0x7E, 0x01]),
            ]
        );
    }

    #[test]
    fn test_status_byte_interrupts_message() {
        let bytes = [0xF0, 0x01, 0x90, 0xF7, 0xF0, 0x02, 0xF7];
        assert_eq!(
            parse_messages(&bytes),
            vec![SystemExclusive::new(vec![0x02])]
        );
    }

    #[test]
    fn test_write_then_read_file() {
        let dir = std::env::temp_dir().join(format!("midiplex-file-test-{}", std::process::id()));
        let path = dir.join("dump.syx");
        let messages = vec![
            SystemExclusive::new(vec![0x41, 0x10, 0x42]),
            SystemExclusive::new(vec![0x7E]),
        ];
        write_file(&path, &messages).unwrap();
        assert_eq!(fs::read(&path).unwrap().len(), 8);
        assert_eq!(read_file(&path).unwrap(), messages);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_incomplete_messages_are_stored_terminated() {
        let dir = std::env::temp_dir().join(format!("midiplex-cut-test-{}", std::process::id()));
        let path = dir.join("cut.syx");
        let messages = vec![
            SystemExclusive {
                data: vec![0x41, 0x10],
                received_with_eox: false,
            },
            SystemExclusive::new(vec![0x7E]),
        ];
        write_file(&path, &messages).unwrap();
        assert_eq!(
            fs::read(&path).unwrap(),
            vec![0xF0, 0x41, 0x10, 0xF7, 0xF0, 0x7E, 0xF7]
        );
        assert_eq!(
            read_file(&path).unwrap(),
            vec![
                SystemExclusive::new(vec![0x41, 0x10]),
                SystemExclusive::new(vec![0x7E]),
            ]
        );
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_without_sysex_is_rejected() {
        let dir = std::env::temp_dir().join(format!("midiplex-empty-test-{}", std::process::id()));
        let path = dir.join("empty.syx");
        write_file(&path, &[]).unwrap();
        assert!(matches!(
            read_file(&path),
            Err(MidiplexError::InvalidSysEx(_))
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_received_file_name() {
        let time = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            received_file_name(time),
            PathBuf::from("Received 2024-03-09 14.05.07.syx")
        );
    }
}
