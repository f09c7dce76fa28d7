//! Schema-driven binary codec
//!
//! The codec is data-driven: for each packet, the ordered field descriptors
//! from the schema drive a linear encode/decode pass. There is no per-packet
//! code; the schema is interpreted.
//!
//! Wire layout per frame: `id (u16 LE) || field₁ || … || fieldₙ [|| bitarray]`.
//! Numerics are little-endian at their declared width, booleans one byte
//! (0 = false), enums one byte indexing the variant list, and the trailing
//! bitarray (orders only) packs one enabled bit per field, MSB-first.

pub mod bitarray;
pub mod message;
pub mod packet;
pub mod value;

pub use message::{MessageParser, Notice};
pub use packet::PacketParser;

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

// =============================================================================
// Values
// =============================================================================

/// Decoded value of a single field
///
/// Untagged on the wire to the console: a JSON number, boolean or string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Numeric(f64),
    Boolean(bool),
    Enum(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Numeric(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Enum(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Decoded telemetry packet
#[derive(Debug, Clone, PartialEq)]
pub struct DataPayload {
    pub values: HashMap<String, Value>,
    /// The full frame as read, kept for hex display
    pub raw: Bytes,
}

/// Decoded (or to-be-encoded) order packet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderPayload {
    pub values: HashMap<String, Value>,
    /// One entry per field, in schema terms; missing entries encode as disabled
    pub enabled: HashMap<String, bool>,
}

/// Typed message decoded from a non-telemetry packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Message {
    Fault(Notice),
    Warning(Notice),
    Info(Notice),
    BlcuAck { id: u16 },
}

// =============================================================================
// Byte cursor
// =============================================================================

/// Forward-only reader over one frame's bytes
///
/// Tracks the packet id and consumed offset so truncation errors report what
/// the schema expected against what the wire delivered.
pub(crate) struct ByteReader<'a> {
    id: u16,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(id: u16, bytes: &'a [u8]) -> Self {
        Self {
            id,
            bytes,
            offset: 0,
        }
    }

    /// Consume exactly `n` bytes
    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.offset + n;
        if end > self.bytes.len() {
            return Err(GatewayError::TooShort {
                id: self.id,
                needed: end,
                got: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }
}
