//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Network
// =============================================================================

/// Default TCP port boards listen on for the gateway dial
pub const DEFAULT_BOARD_TCP_PORT: u16 = 50500;

/// Default UDP port for the passive telemetry sniffer
pub const DEFAULT_SNIFFER_PORT: u16 = 50400;

/// Default read buffer size per TCP read (one frame per read)
pub const DEFAULT_MTU: usize = 1500;

// =============================================================================
// Timing - Reconnection
// =============================================================================

/// Delay between failed dial attempts (milliseconds)
pub const REDIAL_DELAY_MS: u64 = 100;

/// TCP keepalive probe time for board connections (seconds)
pub const TCP_KEEPALIVE_SECS: u64 = 5;

// =============================================================================
// Channels
// =============================================================================

/// Channel capacity for the core telemetry paths (raw, update, message)
pub const CHANNEL_CAPACITY: usize = 100;

/// Channel capacity for connection-change events
pub const CONNECTION_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// Statistics
// =============================================================================

/// Moving-average window for cycle times and numeric fields
pub const MOVING_AVERAGE_ORDER: usize = 100;

// =============================================================================
// Logger
// =============================================================================

/// Default dump size for the session logger (bytes buffered before flush)
pub const DEFAULT_DUMP_SIZE: u64 = 65536;

/// Estimated CSV row size used to derive the dump threshold (bytes)
pub const DEFAULT_ROW_SIZE: u64 = 32;

/// Default autosave interval for the session logger (seconds)
pub const DEFAULT_AUTOSAVE_SECS: u64 = 60;
