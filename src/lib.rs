//! Telemetry and command gateway for a fleet of embedded control boards
//!
//! The gateway dials each board over TCP, decodes its binary telemetry
//! against a declarative packet schema, enriches it with derived statistics
//! (counts, cycle times, rolling averages) and fans it out to subscribers.
//! In the opposite direction it encodes typed orders and writes them to the
//! board that owns the packet id. A best-effort session logger persists
//! values to per-field CSV files on demand.
//!
//! Composition is explicit: [`Vehicle`] owns the transport and codec,
//! [`BoardMux`] routes between the pipeline and its subscribers, and
//! collaborators (console broker, schema exporter) plug in through the
//! traits in [`schema`], [`mux`] and [`logger`].

pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod logger;
pub mod logging;
pub mod mux;
pub mod schema;
pub mod transport;
pub mod vehicle;

pub use codec::{Message, MessageParser, Notice, PacketParser, Value};
pub use error::{GatewayError, Result};
pub use logger::{EnableRequest, Logger, SendMessage};
pub use mux::{BoardMux, DataSink, Fanout, MessageSink};
pub use schema::{Schema, SchemaSource, TomlSchemaSource, UnitConverter};
pub use transport::{ConnectionEvent, Pipe, Raw, Sniffer};
pub use vehicle::{Order, OrderField, Stats, StatsSnapshot, Update, UpdateValue, Vehicle};
