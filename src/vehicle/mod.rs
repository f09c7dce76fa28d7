//! Vehicle: composition root of the telemetry/orders pipeline
//!
//! Owns the pipes, the parsers, both unit converters and the update factory.
//! `listen` wires the inbound path (raw frames → typed updates/messages),
//! `send_order` is the outbound inverse. Everything in between talks over
//! bounded channels; the factory and converters live on the decoding task
//! and need no synchronization.

pub mod average;
pub mod factory;
pub mod stats;

pub use average::MovingAverage;
pub use factory::{Update, UpdateFactory, UpdateValue};
pub use stats::{Stats, StatsSnapshot};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::codec::{Message, MessageParser, OrderPayload, PacketParser, Value};
use crate::config::VehicleConfig;
use crate::constants::{CHANNEL_CAPACITY, CONNECTION_CHANNEL_CAPACITY};
use crate::error::{GatewayError, Result};
use crate::schema::{PacketKind, Schema, UnitConverter};
use crate::transport::{ConnectionEvent, Pipe, Raw, Sniffer};

// =============================================================================
// Orders
// =============================================================================

/// One field of an outbound order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderField {
    pub value: Value,
    pub enabled: bool,
}

/// Typed command bound for a board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u16,
    pub fields: HashMap<String, OrderField>,
}

// =============================================================================
// Vehicle
// =============================================================================

/// Composition root for pipes, parsers and the update factory
pub struct Vehicle {
    schema: Arc<Schema>,
    pipes: HashMap<String, Pipe>,
    parser: PacketParser,
    message_parser: MessageParser,
    pod_converter: UnitConverter,
    display_converter: UnitConverter,
    stats: Arc<Stats>,
    /// Consumed by the first `listen` call
    raw_rx: Option<mpsc::Receiver<Raw>>,
    /// Moved onto the decoding task by `listen`
    factory: Option<UpdateFactory>,
    sniffer_shutdown: Arc<AtomicBool>,
}

impl Vehicle {
    /// Spawn one pipe per schema board (and the sniffer, if enabled) and
    /// assemble the decode pipeline around them
    ///
    /// Returns the vehicle and the connection-event stream its pipes feed.
    pub fn new(
        schema: Arc<Schema>,
        config: &VehicleConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionEvent>)> {
        let (raw_tx, raw_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (conn_tx, conn_rx) = mpsc::channel(CONNECTION_CHANNEL_CAPACITY);

        let laddr: SocketAddr = format!("{}:0", config.local_ip).parse().map_err(|_| {
            GatewayError::ConfigValidation {
                field: "local_ip",
                reason: format!("not an IP address: {:?}", config.local_ip),
            }
        })?;

        let mut pipes = HashMap::new();
        for board in schema.boards() {
            let raddr: SocketAddr = format!("{}:{}", board.ip, config.board_port)
                .parse()
                .map_err(|_| GatewayError::SchemaValidation {
                    reason: format!("board {}: bad IP {:?}", board.name, board.ip),
                })?;
            let pipe = Pipe::spawn(
                board.name.clone(),
                laddr,
                raddr,
                config.mtu,
                raw_tx.clone(),
                conn_tx.clone(),
            );
            pipes.insert(board.name.clone(), pipe);
        }

        let sniffer_shutdown = Arc::new(AtomicBool::new(false));
        if config.sniffer.enabled {
            Sniffer::spawn(config.sniffer.port, raw_tx, sniffer_shutdown.clone())?;
        }

        let (pod_converter, display_converter) = schema.unit_converters();

        info!(boards = pipes.len(), "vehicle assembled");
        Ok((
            Self {
                parser: PacketParser::new(schema.clone()),
                message_parser: MessageParser::new(schema.clone()),
                schema,
                pipes,
                pod_converter,
                display_converter,
                stats: Arc::new(Stats::new()),
                raw_rx: Some(raw_rx),
                factory: Some(UpdateFactory::new()),
                sniffer_shutdown,
            },
            conn_rx,
        ))
    }

    /// Start the inbound pipeline: raw frames out of the pipes, typed
    /// updates and messages into the given channels
    ///
    /// Spawns the demux task plus one decoding loop per output. Calling it
    /// twice is a no-op; the raw channel has a single consumer.
    pub fn listen(&mut self, update_tx: mpsc::Sender<Update>, message_tx: mpsc::Sender<Message>) {
        let Some(raw_rx) = self.raw_rx.take() else {
            warn!("listen called twice, ignoring");
            return;
        };
        let factory = self.factory.take().unwrap_or_default();

        let (data_tx, data_rx) = mpsc::channel::<Raw>(CHANNEL_CAPACITY);
        let (msg_tx, msg_rx) = mpsc::channel::<Raw>(CHANNEL_CAPACITY);

        tokio::spawn(demux(
            raw_rx,
            self.schema.clone(),
            self.stats.clone(),
            data_tx,
            msg_tx,
        ));
        tokio::spawn(listen_data(
            data_rx,
            self.parser.clone(),
            self.pod_converter.clone(),
            self.display_converter.clone(),
            factory,
            self.stats.clone(),
            update_tx,
        ));
        tokio::spawn(listen_messages(
            msg_rx,
            self.message_parser.clone(),
            self.stats.clone(),
            message_tx,
        ));
        info!("start listening");
    }

    /// Encode and write one order to the board that owns its packet id
    ///
    /// Values arrive in display units and leave the gateway in pod units:
    /// `display.revert` then `pod.convert`, the exact inverse of the inbound
    /// composition. Routing failures surface before any stats are touched;
    /// encode and write failures count as failed sends.
    pub async fn send_order(&self, order: &Order) -> Result<()> {
        info!(id = order.id, "send order");

        let board = self
            .schema
            .board_for(order.id)
            .ok_or(GatewayError::RoutingMiss { id: order.id })?;
        let pipe = self
            .pipes
            .get(board)
            .ok_or_else(|| GatewayError::NoHandler {
                board: board.to_string(),
            })?;

        let mut values = HashMap::with_capacity(order.fields.len());
        let mut enabled = HashMap::with_capacity(order.fields.len());
        for (name, field) in &order.fields {
            values.insert(name.clone(), field.value.clone());
            enabled.insert(name.clone(), field.enabled);
        }
        self.display_converter.revert(&mut values);
        self.pod_converter.convert(&mut values);

        let result = match self.parser.encode_order(order.id, &OrderPayload { values, enabled }) {
            Ok(frame) => pipe.write(&frame).await.map(|_| self.stats.add_sent()),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!(id = order.id, error = %e, "order not sent");
            self.stats.add_sent_fail();
        }
        result
    }

    /// Consume the outbound order channel until it closes
    pub fn serve_orders(self: &Arc<Self>, mut order_rx: mpsc::Receiver<Order>) {
        let vehicle = self.clone();
        tokio::spawn(async move {
            while let Some(order) = order_rx.recv().await {
                // Errors already counted and logged; caller-side reporting
                // happens on the request path.
                let _ = vehicle.send_order(&order).await;
            }
            debug!("order channel closed");
        });
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Close every pipe and the sniffer for good
    pub fn close(&self) {
        for pipe in self.pipes.values() {
            pipe.close();
        }
        self.sniffer_shutdown.store(true, Ordering::Relaxed);
    }
}

// =============================================================================
// Pipeline tasks
// =============================================================================

/// Split the shared raw stream by packet kind
async fn demux(
    mut raw_rx: mpsc::Receiver<Raw>,
    schema: Arc<Schema>,
    stats: Arc<Stats>,
    data_tx: mpsc::Sender<Raw>,
    msg_tx: mpsc::Sender<Raw>,
) {
    while let Some(raw) = raw_rx.recv().await {
        let Some(id) = PacketParser::packet_id(&raw.payload) else {
            stats.add_parse_error();
            warn!(len = raw.payload.len(), "frame too short for an id");
            continue;
        };
        let Some(packet) = schema.packet(id) else {
            stats.add_parse_error();
            warn!(id, "unknown packet id");
            continue;
        };

        let forwarded = match packet.kind {
            PacketKind::Data => data_tx.send(raw).await.is_ok(),
            kind if kind.is_message() => msg_tx.send(raw).await.is_ok(),
            _ => {
                // Boards do not emit orders; drop quietly
                trace!(id, "inbound order frame dropped");
                true
            }
        };
        if !forwarded {
            break;
        }
    }
    debug!("demux stopped");
}

/// Decode data frames into enriched updates
async fn listen_data(
    mut data_rx: mpsc::Receiver<Raw>,
    parser: PacketParser,
    pod_converter: UnitConverter,
    display_converter: UnitConverter,
    mut factory: UpdateFactory,
    stats: Arc<Stats>,
    update_tx: mpsc::Sender<Update>,
) {
    while let Some(raw) = data_rx.recv().await {
        let (id, mut payload) = match parser.decode_data(raw.payload.clone()) {
            Ok(decoded) => decoded,
            Err(e) => {
                stats.add_parse_error();
                warn!(error = %e, "data frame dropped");
                continue;
            }
        };

        pod_converter.revert(&mut payload.values);
        display_converter.convert(&mut payload.values);

        let update = factory.new_update(id, &payload.raw, payload.values, raw.metadata.timestamp_ns);
        stats.add_recv();

        trace!(id, "read data");
        if update_tx.send(update).await.is_err() {
            break;
        }
    }
    debug!("data listener stopped");
}

/// Decode message frames into typed notices
async fn listen_messages(
    mut msg_rx: mpsc::Receiver<Raw>,
    parser: MessageParser,
    stats: Arc<Stats>,
    message_tx: mpsc::Sender<Message>,
) {
    while let Some(raw) = msg_rx.recv().await {
        let message = match parser.parse(&raw.payload) {
            Ok(message) => message,
            Err(e) => {
                stats.add_parse_error();
                warn!(error = %e, "message frame dropped");
                continue;
            }
        };
        if message_tx.send(message).await.is_err() {
            break;
        }
    }
    debug!("message listener stopped");
}
