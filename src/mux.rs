//! Board mux: fan updates out by board, route orders back by packet id
//!
//! The mux is the seam between the pipeline and its subscribers. Inbound it
//! runs a single task consuming the update channel, so each handler sees
//! updates in the order the factory produced them. Outbound it validates the
//! packet-id → board mapping and forwards the order to the vehicle's
//! consumer task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::Message;
use crate::error::{GatewayError, Result};
use crate::vehicle::{Order, Update};

// =============================================================================
// Sinks
// =============================================================================

/// Consumer of decoded updates (console transfer, logger, ...)
///
/// `notify` must not block: it runs on the mux task. Sinks that buffer are
/// expected to drop rather than stall.
pub trait DataSink: Send + Sync {
    fn notify(&self, update: Update);
}

/// Consumer of typed messages (faults, warnings, info)
pub trait MessageSink: Send + Sync {
    fn notify(&self, message: Message);
}

/// Deliver every update to several sinks in registration order
pub struct Fanout {
    sinks: Vec<Arc<dyn DataSink>>,
}

impl Fanout {
    pub fn new(sinks: Vec<Arc<dyn DataSink>>) -> Self {
        Self { sinks }
    }
}

impl DataSink for Fanout {
    fn notify(&self, update: Update) {
        for sink in &self.sinks {
            sink.notify(update.clone());
        }
    }
}

// =============================================================================
// BoardMux
// =============================================================================

/// Routes updates to per-board handlers and orders to the outbound path
pub struct BoardMux {
    board_by_packet: HashMap<u16, String>,
    handlers: HashMap<String, Arc<dyn DataSink>>,
    order_tx: mpsc::Sender<Order>,
}

impl BoardMux {
    /// The sender side of the vehicle's order consumer channel
    pub fn new(order_tx: mpsc::Sender<Order>) -> Self {
        Self {
            board_by_packet: HashMap::new(),
            handlers: HashMap::new(),
            order_tx,
        }
    }

    /// Register which packet ids belong to which board
    pub fn add_board_mapping(&mut self, ids_by_board: HashMap<String, Vec<u16>>) {
        for (board, ids) in ids_by_board {
            for id in ids {
                self.board_by_packet.insert(id, board.clone());
            }
        }
    }

    /// Register the handler updates for `board` are delivered to
    pub fn add_board(&mut self, board: impl Into<String>, handler: Arc<dyn DataSink>) {
        self.handlers.insert(board.into(), handler);
    }

    /// Route one order toward its board
    ///
    /// Fails fast with `RoutingMiss` so the caller (the console request
    /// path) can report it; delivery failures downstream are counted by the
    /// vehicle.
    pub async fn request(&self, order: Order) -> Result<()> {
        let id = order.id;
        if !self.board_by_packet.contains_key(&id) {
            warn!(id, "order without mapping");
            return Err(GatewayError::RoutingMiss { id });
        }
        self.order_tx
            .send(order)
            .await
            .map_err(|_| GatewayError::NoHandler {
                board: "order consumer".to_string(),
            })
    }

    /// Consume the update channel, delivering per-pipe source order to each
    /// handler; unroutable updates are dropped and logged
    ///
    /// Register mappings and handlers before calling: the listen task works
    /// on a snapshot of the routing tables.
    pub fn listen(&self, mut update_rx: mpsc::Receiver<Update>) -> JoinHandle<()> {
        info!(
            packets = self.board_by_packet.len(),
            boards = self.handlers.len(),
            "mux listening"
        );
        let board_by_packet = self.board_by_packet.clone();
        let handlers = self.handlers.clone();
        tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                let Some(board) = board_by_packet.get(&update.id) else {
                    warn!(id = update.id, "update without mapping");
                    continue;
                };
                let Some(handler) = handlers.get(board) else {
                    warn!(board = %board, "update without handler");
                    continue;
                };
                handler.notify(update);
            }
            debug!("mux stopped");
        })
    }
}
