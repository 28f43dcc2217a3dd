//! Translation of raw device frames into scan results.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a received frame could not be turned into a scan payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame length {length} exceeds buffer of {available} bytes")]
    LengthOutOfRange { length: usize, available: usize },

    #[error("payload of {length} bytes exceeds limit of {limit}")]
    TooLong { length: usize, limit: usize },

    #[error("empty payload")]
    Empty,

    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// How inbound frames are interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Replace invalid UTF-8 sequences instead of rejecting the frame.
    pub lossy: bool,
    /// Strip the CR/LF/TAB/NUL suffix scanners append to each code.
    pub strip_terminators: bool,
    /// Largest accepted payload in bytes.
    pub max_payload_len: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            lossy: false,
            strip_terminators: true,
            max_payload_len: 4096,
        }
    }
}

fn is_terminator(b: u8) -> bool {
    matches!(b, b'\r' | b'\n' | b'\t' | 0)
}

/// Decode `bytes[..length]` into payload text.
pub fn decode_payload(
    bytes: &[u8],
    length: usize,
    config: &DecodeConfig,
) -> Result<String, DecodeError> {
    if length > bytes.len() {
        return Err(DecodeError::LengthOutOfRange {
            length,
            available: bytes.len(),
        });
    }
    if length > config.max_payload_len {
        return Err(DecodeError::TooLong {
            length,
            limit: config.max_payload_len,
        });
    }

    let mut payload = &bytes[..length];
    if config.strip_terminators {
        let end = payload
            .iter()
            .rposition(|&b| !is_terminator(b))
            .map_or(0, |i| i + 1);
        payload = &payload[..end];
    }
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    if config.lossy {
        Ok(String::from_utf8_lossy(payload).into_owned())
    } else {
        Ok(std::str::from_utf8(payload)?.to_owned())
    }
}

/// One decoded barcode read.
///
/// Immutable once built. `sequence` orders results within a manager and
/// never repeats, even across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    sequence: u64,
    session_id: u64,
    text: String,
    raw: Vec<u8>,
    received_at: SystemTime,
}

impl ScanResult {
    pub(crate) fn new(sequence: u64, session_id: u64, text: String, raw: Vec<u8>) -> Self {
        Self {
            sequence,
            session_id,
            text,
            raw,
            received_at: SystemTime::now(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Id of the session that produced this result.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Decoded payload text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Frame bytes as received, before terminator stripping.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
