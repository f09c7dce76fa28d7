//! Traffic statistics for the gateway
//!
//! Thread-safe counters shared between the decoding task, the order path and
//! any UI poller. Uses lock-free atomics for all operations.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the frame counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Updates decoded and forwarded
    pub recv: u64,
    /// Orders written successfully
    pub sent: u64,
    /// Orders that failed to encode or write
    pub sent_fail: u64,
    /// Frames dropped for parse faults (unknown id, truncation, bad enum)
    pub parse_errors: u64,
}

/// Frame counters (fully lock-free)
pub struct Stats {
    recv: AtomicU64,
    sent: AtomicU64,
    sent_fail: AtomicU64,
    parse_errors: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            recv: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            sent_fail: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
        }
    }

    /// Record one decoded update
    #[inline]
    pub fn add_recv(&self) {
        self.recv.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one order written to a board
    #[inline]
    pub fn add_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed order send
    #[inline]
    pub fn add_sent_fail(&self) {
        self.sent_fail.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dropped frame
    #[inline]
    pub fn add_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            recv: self.recv.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            sent_fail: self.sent_fail.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = Stats::new();
        stats.add_recv();
        stats.add_recv();
        stats.add_sent();
        stats.add_sent_fail();
        stats.add_parse_error();

        let snap = stats.snapshot();
        assert_eq!(snap.recv, 2);
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.sent_fail, 1);
        assert_eq!(snap.parse_errors, 1);
    }

    #[test]
    fn test_snapshot_starts_at_zero() {
        let snap = Stats::new().snapshot();
        assert_eq!(snap.recv, 0);
        assert_eq!(snap.sent, 0);
        assert_eq!(snap.sent_fail, 0);
        assert_eq!(snap.parse_errors, 0);
    }
}
