//! Update factory: snapshot records enriched with derived statistics
//!
//! One factory instance lives on the decoding task; it is not thread-safe
//! and never needs to be. State (counters, window averages, last-seen
//! timestamps) is inserted lazily on first observation of an id or field and
//! never evicted.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use serde::Serialize;

use super::average::MovingAverage;
use crate::codec::Value;
use crate::constants::MOVING_AVERAGE_ORDER;

/// Field value enriched with derived statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UpdateValue {
    Numeric { value: f64, avg: f64 },
    Boolean { value: bool },
    Enum { value: String },
}

impl fmt::Display for UpdateValue {
    /// The plain value, without derived statistics (what the logger persists)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateValue::Numeric { value, .. } => write!(f, "{}", value),
            UpdateValue::Boolean { value } => write!(f, "{}", value),
            UpdateValue::Enum { value } => write!(f, "{}", value),
        }
    }
}

/// Enriched record produced per decoded data packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub id: u16,
    /// Lowercase hex of the full frame as read
    pub hex_value: String,
    pub values: HashMap<String, UpdateValue>,
    /// Total successful updates seen for this id
    pub count: u64,
    /// Windowed mean interval between frames of this id, nanoseconds
    pub cycle_time_ns: u64,
}

/// Derives counts, cycle times and running means per packet id
pub struct UpdateFactory {
    count: HashMap<u16, u64>,
    cycle_avg: HashMap<u16, MovingAverage<u64>>,
    last_timestamp: HashMap<u16, u64>,
    field_avg: HashMap<u16, HashMap<String, MovingAverage<f64>>>,
}

impl UpdateFactory {
    pub fn new() -> Self {
        Self {
            count: HashMap::new(),
            cycle_avg: HashMap::new(),
            last_timestamp: HashMap::new(),
            field_avg: HashMap::new(),
        }
    }

    /// Assemble the update for one decoded frame
    pub fn new_update(
        &mut self,
        id: u16,
        raw: &[u8],
        values: HashMap<String, Value>,
        timestamp_ns: u64,
    ) -> Update {
        Update {
            id,
            hex_value: to_hex(raw),
            values: self.enrich(id, values),
            count: self.bump_count(id),
            cycle_time_ns: self.cycle_time(id, timestamp_ns),
        }
    }

    fn bump_count(&mut self, id: u16) -> u64 {
        let count = self.count.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    fn enrich(&mut self, id: u16, values: HashMap<String, Value>) -> HashMap<String, UpdateValue> {
        let mut enriched = HashMap::with_capacity(values.len());
        for (name, value) in values {
            let update_value = match value {
                Value::Numeric(v) => {
                    let avg = self.field_average(id, &name).add(v);
                    UpdateValue::Numeric { value: v, avg }
                }
                Value::Boolean(v) => UpdateValue::Boolean { value: v },
                Value::Enum(v) => UpdateValue::Enum { value: v },
            };
            enriched.insert(name, update_value);
        }
        enriched
    }

    fn field_average(&mut self, id: u16, name: &str) -> &mut MovingAverage<f64> {
        self.field_avg
            .entry(id)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| MovingAverage::new(MOVING_AVERAGE_ORDER))
    }

    /// Windowed mean of the interval between frames of this id
    ///
    /// First sighting reports 0 and is excluded from the average: the seed
    /// interval is an artifact of process start, not a property of the board.
    fn cycle_time(&mut self, id: u16, timestamp_ns: u64) -> u64 {
        let Some(last) = self.last_timestamp.insert(id, timestamp_ns) else {
            return 0;
        };

        let cycle = timestamp_ns.saturating_sub(last);
        self.cycle_avg
            .entry(id)
            .or_insert_with(|| MovingAverage::new(MOVING_AVERAGE_ORDER))
            .add(cycle)
    }
}

impl Default for UpdateFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
