//! Transport layer: raw frames in, serialized orders out
//!
//! Two producers feed the shared raw channel: one [`Pipe`] per board (active
//! TCP client) and optionally one [`Sniffer`] (passive capture). Each
//! successful read becomes one [`Raw`]; the frame boundary is whatever the OS
//! delivered in a single read, and the packet id at offset 0 is the decoder's
//! framing discriminator.

pub mod pipe;
pub mod sniffer;

pub use pipe::Pipe;
pub use sniffer::Sniffer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Process-wide counter stamped onto each produced [`Raw`]
///
/// Not a wire field: it exists so downstream consumers can reason about
/// produce order across pipes.
static SEQ_NUM: AtomicU64 = AtomicU64::new(0);

fn next_seq_num() -> u64 {
    SEQ_NUM.fetch_add(1, Ordering::Relaxed) + 1
}

/// Wall clock in nanoseconds since the Unix epoch
pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Produce-time metadata attached to each raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Remote endpoint the frame came from
    pub from: String,
    /// Local endpoint it arrived at
    pub to: String,
    /// Process-wide monotonic counter, assigned at produce time
    pub seq_num: u64,
    /// Nanoseconds since the Unix epoch at produce time
    pub timestamp_ns: u64,
}

/// One frame as delivered by a single socket read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw {
    pub metadata: Metadata,
    pub payload: Bytes,
}

impl Raw {
    /// Stamp a freshly read buffer with produce-time metadata
    pub fn new(from: String, to: String, payload: Bytes) -> Self {
        Self {
            metadata: Metadata {
                from,
                to,
                seq_num: next_seq_num(),
                timestamp_ns: now_nanos(),
            },
            payload,
        }
    }
}

/// Connection state transition reported by a pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub board: String,
    pub is_up: bool,
}
