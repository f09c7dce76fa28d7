//! pod-gateway - telemetry and command gateway for the board fleet
//!
//! Usage:
//!   pod-gateway                     Run with gateway.toml next to the binary
//!   pod-gateway --schema <path>     Override the schema file location
//!   pod-gateway --verbose           Debug-level log output

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use pod_gateway::constants::CHANNEL_CAPACITY;
use pod_gateway::{
    config, logging, BoardMux, Logger, Schema, SchemaSource, SendMessage, TomlSchemaSource,
    Vehicle,
};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let verbose = args.iter().any(|a| a == "--verbose");
    logging::init_tracing(verbose);

    let mut config = config::load();
    if let Some(schema_path) = parse_arg(&args, "--schema") {
        config.schema_path = schema_path.into();
    }

    let schema = TomlSchemaSource::new(&config.schema_path)
        .load()
        .with_context(|| format!("loading schema from {}", config.schema_path.display()))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, Arc::new(schema)))
}

fn parse_arg(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1).cloned())
}

async fn run(config: config::GatewayConfig, schema: Arc<Schema>) -> Result<()> {
    let (mut vehicle, mut conn_rx) = Vehicle::new(schema.clone(), &config.vehicle)?;

    let (update_tx, update_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (message_tx, mut message_rx) = mpsc::channel(CHANNEL_CAPACITY);
    vehicle.listen(update_tx, message_tx);
    let vehicle = Arc::new(vehicle);

    let (order_tx, order_rx) = mpsc::channel(CHANNEL_CAPACITY);
    vehicle.serve_orders(order_rx);

    // The console broker is a separate process; until it registers, state
    // notifications land in the log.
    let logger = Arc::new(Logger::spawn(config.logger.clone(), Arc::new(TraceBus)));

    let mut mux = BoardMux::new(order_tx);
    let mut ids_by_board: HashMap<String, Vec<u16>> = HashMap::new();
    for (id, board) in schema.routing() {
        ids_by_board.entry(board.clone()).or_default().push(*id);
    }
    mux.add_board_mapping(ids_by_board);
    for board in schema.boards() {
        mux.add_board(&board.name, logger.clone());
    }
    let _mux_task = mux.listen(update_rx);

    tokio::spawn(async move {
        while let Some(message) = message_rx.recv().await {
            info!(?message, "board message");
        }
    });
    tokio::spawn(async move {
        while let Some(event) = conn_rx.recv().await {
            info!(board = %event.board, up = event.is_up, "connection change");
        }
    });

    info!("gateway running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    vehicle.close();
    let stats = vehicle.stats();
    info!(
        recv = stats.recv,
        sent = stats.sent,
        sent_fail = stats.sent_fail,
        parse_errors = stats.parse_errors,
        "gateway stopped"
    );
    Ok(())
}

/// Fallback notification sink: log instead of publish
struct TraceBus;

impl SendMessage for TraceBus {
    fn send(&self, topic: &str, payload: serde_json::Value) -> pod_gateway::Result<()> {
        warn!(topic = %topic, %payload, "no broker registered, notification logged");
        Ok(())
    }
}
