//! Centralized error types for the gateway
//!
//! All gateway errors are represented by the `GatewayError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, GatewayError>`.
//!
//! Per-frame parse faults are recoverable: the frame is dropped, a counter
//! incremented, and the pipeline keeps running. Only malformed startup
//! configuration and an unparseable schema abort the process.

use std::fmt;
use std::path::PathBuf;

/// All gateway errors
#[derive(Debug)]
pub enum GatewayError {
    // === Transport ===
    /// Write attempted on a pipe with no live connection
    PipeClosed { board: String },
    /// Socket write failed mid-transfer
    PipeWrite {
        board: String,
        source: std::io::Error,
    },
    /// Failed to bind the sniffer capture socket
    SnifferBind { port: u16, source: std::io::Error },

    // === Parse (per-frame, recoverable) ===
    /// Frame ended before the schema said it would
    TooShort { id: u16, needed: usize, got: usize },
    /// Packet id not present in the schema
    UnknownId { id: u16 },
    /// Enum byte does not index a declared variant
    InvalidEnum {
        field: String,
        index: u8,
        variants: usize,
    },
    /// Operation requires a packet of a different kind
    /// (e.g. encoding an order against a data packet id)
    KindMismatch { id: u16, expected: &'static str },
    /// A field named by an order is not declared for that packet
    UnknownField { id: u16, field: String },
    /// Value variant does not match the field's declared kind
    ValueMismatch {
        field: String,
        expected: &'static str,
    },

    // === Routing ===
    /// No board mapping for this packet id
    RoutingMiss { id: u16 },
    /// Board is mapped but has no registered handler or pipe
    NoHandler { board: String },

    // === Logger ===
    /// Enable/disable request from a client that does not own the session
    SessionConflict { client: String },
    /// Filesystem failure during a session flush (session-fatal)
    SessionIo {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Collaborators ===
    /// Session-state notification could not be delivered
    SendMessage { topic: String, reason: String },

    // === Config ===
    /// Failed to read config file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Schema ===
    /// Failed to read schema file
    SchemaRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Schema contents are inconsistent (duplicate ids, empty enums, ...)
    SchemaValidation { reason: String },
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PipeWrite { source, .. }
            | Self::SnifferBind { source, .. }
            | Self::SessionIo { source, .. }
            | Self::ConfigRead { source, .. }
            | Self::SchemaRead { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PipeClosed { board } => write!(f, "pipe to {} is closed", board),
            Self::PipeWrite { board, .. } => write!(f, "write to {} failed", board),
            Self::SnifferBind { port, .. } => write!(f, "cannot bind sniffer port {}", port),
            Self::TooShort { id, needed, got } => {
                write!(
                    f,
                    "packet {:#06x} too short: needed {} bytes, got {}",
                    id, needed, got
                )
            }
            Self::UnknownId { id } => write!(f, "unknown packet id {:#06x}", id),
            Self::InvalidEnum {
                field,
                index,
                variants,
            } => {
                write!(
                    f,
                    "enum index {} out of range for {} ({} variants)",
                    index, field, variants
                )
            }
            Self::KindMismatch { id, expected } => {
                write!(f, "packet {:#06x} is not {}", id, expected)
            }
            Self::UnknownField { id, field } => {
                write!(f, "packet {:#06x} has no field {}", id, field)
            }
            Self::ValueMismatch { field, expected } => {
                write!(f, "field {} expects {}", field, expected)
            }
            Self::RoutingMiss { id } => write!(f, "no board mapping for packet {:#06x}", id),
            Self::NoHandler { board } => write!(f, "no handler registered for {}", board),
            Self::SessionConflict { client } => {
                write!(f, "log session owned by another client, ignoring {}", client)
            }
            Self::SessionIo { path, .. } => {
                write!(f, "log session I/O failed: {}", path.display())
            }
            Self::SendMessage { topic, reason } => {
                write!(f, "cannot publish on {}: {}", topic, reason)
            }
            Self::ConfigRead { path, .. } => {
                write!(f, "cannot read config: {}", path.display())
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "invalid {}: {}", field, reason)
            }
            Self::SchemaRead { path, .. } => {
                write!(f, "cannot read schema: {}", path.display())
            }
            Self::SchemaValidation { reason } => write!(f, "invalid schema: {}", reason),
        }
    }
}

/// Alias for Result with GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_display_packet_id_as_hex() {
        let err = GatewayError::UnknownId { id: 0x210 };
        assert!(err.to_string().contains("0x0210"));

        let err = GatewayError::TooShort {
            id: 0x100,
            needed: 9,
            got: 4,
        };
        assert!(err.to_string().contains("0x0100"));
        assert!(err.to_string().contains("needed 9"));
    }

    #[test]
    fn test_io_errors_expose_source() {
        let err = GatewayError::SessionIo {
            path: PathBuf::from("/tmp/x.csv"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(std::error::Error::source(&err).is_some());

        let err = GatewayError::RoutingMiss { id: 99 };
        assert!(std::error::Error::source(&err).is_none());
    }
}
