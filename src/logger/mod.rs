//! Session logger: best-effort CSV persistence of update values
//!
//! At most one recording session exists at a time and it is owned by the
//! client that started it; enable/disable requests from anyone else are
//! ignored with a warning. While a session runs, every update's fields are
//! buffered per name and flushed to CSV when any buffer crosses the dump
//! threshold or the autosave timer fires.
//!
//! The logger is deliberately not authoritative: its ingress drops updates
//! rather than stall the mux, and filesystem failures end the session, not
//! the process. Session-state transitions are published through the injected
//! [`SendMessage`] collaborator.

mod session;

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::LoggerConfig;
use crate::constants::CHANNEL_CAPACITY;
use crate::error::Result;
use crate::mux::DataSink;
use crate::vehicle::Update;
use session::Session;

/// Enable or disable a recording session on behalf of a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableRequest {
    pub client: String,
    pub enable: bool,
}

/// Outbound notification channel toward the console broker
pub trait SendMessage: Send + Sync {
    fn send(&self, topic: &str, payload: serde_json::Value) -> Result<()>;
}

/// Session ownership state, shared with the run thread
#[derive(Default)]
struct SessionState {
    running: bool,
    client: String,
}

/// Handle to the logger's listen loop
pub struct Logger {
    updates_tx: mpsc::Sender<Update>,
    enable_tx: mpsc::Sender<EnableRequest>,
    state: Arc<Mutex<SessionState>>,
}

impl Logger {
    /// Spawn the listen loop and return the control handle
    pub fn spawn(config: LoggerConfig, notifier: Arc<dyn SendMessage>) -> Self {
        info!(path = %config.path.display(), "new logger");

        let (updates_tx, updates_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (enable_tx, enable_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let state = Arc::new(Mutex::new(SessionState::default()));

        tokio::spawn(listen(config, notifier, updates_rx, enable_rx, state.clone()));

        Self {
            updates_tx,
            enable_tx,
            state,
        }
    }

    /// Submit an enable/disable request on behalf of `client`
    pub async fn enable(&self, client: impl Into<String>, enable: bool) {
        let _ = self
            .enable_tx
            .send(EnableRequest {
                client: client.into(),
                enable,
            })
            .await;
    }

    /// Ingress for wiring outside the mux (tests, replay tools)
    pub fn updates(&self) -> mpsc::Sender<Update> {
        self.updates_tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn client(&self) -> Option<String> {
        let state = self.state.lock();
        if state.client.is_empty() {
            None
        } else {
            Some(state.client.clone())
        }
    }
}

impl DataSink for Logger {
    /// Non-blocking by contract: excess updates are dropped, the logger is
    /// best-effort
    fn notify(&self, update: Update) {
        let _ = self.updates_tx.try_send(update);
    }
}

// =============================================================================
// Listen loop
// =============================================================================

async fn listen(
    config: LoggerConfig,
    notifier: Arc<dyn SendMessage>,
    mut updates_rx: mpsc::Receiver<Update>,
    mut enable_rx: mpsc::Receiver<EnableRequest>,
    state: Arc<Mutex<SessionState>>,
) {
    // Dropping the sender is what ends the run thread: it drains, flushes
    // and closes on disconnect.
    let mut session_tx: Option<std_mpsc::SyncSender<Update>> = None;

    loop {
        tokio::select! {
            req = enable_rx.recv() => {
                let Some(req) = req else { break };
                handle_enable(req, &config, &notifier, &state, &mut session_tx);
            }
            update = updates_rx.recv() => {
                let Some(update) = update else { break };
                if let Some(tx) = &session_tx {
                    // Best-effort: drop when the session cannot keep up
                    let _ = tx.try_send(update);
                }
            }
        }
    }

    debug!("logger stopped");
}

fn handle_enable(
    req: EnableRequest,
    config: &LoggerConfig,
    notifier: &Arc<dyn SendMessage>,
    state: &Arc<Mutex<SessionState>>,
    session_tx: &mut Option<std_mpsc::SyncSender<Update>>,
) {
    let mut st = state.lock();

    if !st.client.is_empty() && st.client != req.client {
        warn!(client = %req.client, "tried to change a running log session");
        return;
    }

    if req.enable && !st.running {
        st.running = true;
        st.client = req.client.clone();
        notify_state(notifier, &config.state_topic, true);

        let (tx, rx) = std_mpsc::sync_channel(CHANNEL_CAPACITY);
        *session_tx = Some(tx);
        spawn_session(config, notifier.clone(), state.clone(), rx);
        info!(client = %req.client, "log session started");
    } else if !req.enable && st.running {
        st.running = false;
        st.client.clear();
        notify_state(notifier, &config.state_topic, false);

        // Disconnect triggers the final flush in the run thread
        *session_tx = None;
        info!(client = %req.client, "log session stopped");
    }
}

fn notify_state(notifier: &Arc<dyn SendMessage>, topic: &str, running: bool) {
    if let Err(e) = notifier.send(topic, serde_json::json!(running)) {
        error!(topic = %topic, error = %e, "state notification failed");
    }
}

// =============================================================================
// Run thread
// =============================================================================

/// One dedicated thread per session; file I/O never touches the runtime
fn spawn_session(
    config: &LoggerConfig,
    notifier: Arc<dyn SendMessage>,
    state: Arc<Mutex<SessionState>>,
    rx: std_mpsc::Receiver<Update>,
) {
    let session = Session::new(config.path.clone(), config.dump_threshold());
    let autosave = Duration::from_secs(config.autosave_secs.max(1));
    let state_topic = config.state_topic.clone();

    let spawned = thread::Builder::new()
        .name("pod-gateway-session".to_string())
        .spawn(move || run_session(rx, session, autosave, notifier, state, state_topic));
    if let Err(e) = spawned {
        error!(error = %e, "cannot spawn session thread");
    }
}

fn run_session(
    rx: std_mpsc::Receiver<Update>,
    mut session: Session,
    autosave: Duration,
    notifier: Arc<dyn SendMessage>,
    state: Arc<Mutex<SessionState>>,
    state_topic: String,
) {
    debug!("run session");
    loop {
        match rx.recv_timeout(autosave) {
            Ok(update) => {
                session.append(&update);
                if session.should_dump() {
                    if let Err(e) = session.flush() {
                        fatal(e, &mut session, &notifier, &state, &state_topic);
                        return;
                    }
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if let Err(e) = session.flush() {
                    fatal(e, &mut session, &notifier, &state, &state_topic);
                    return;
                }
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                // Session stopped by its owner: drain what remains
                if let Err(e) = session.flush() {
                    error!(error = %e, "final flush failed");
                }
                let _ = session.close();
                return;
            }
        }
    }
}

/// Filesystem failure: end the session cleanly, the process keeps running
fn fatal(
    err: crate::error::GatewayError,
    session: &mut Session,
    notifier: &Arc<dyn SendMessage>,
    state: &Arc<Mutex<SessionState>>,
    state_topic: &str,
) {
    error!(error = %err, "session aborted");
    {
        let mut st = state.lock();
        st.running = false;
        st.client.clear();
        notify_state(notifier, state_topic, false);
    }
    let _ = session.close();
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::UpdateValue;
    use std::collections::HashMap;

    struct RecordingBus {
        sent: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl RecordingBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl SendMessage for RecordingBus {
        fn send(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
            self.sent.lock().push((topic.to_string(), payload));
            Ok(())
        }
    }

    fn config(dir: &tempfile::TempDir) -> LoggerConfig {
        LoggerConfig {
            dump_size: 64,
            row_size: 32,
            autosave_secs: 60,
            path: dir.path().to_path_buf(),
            enable_topic: "logger/enable".into(),
            state_topic: "logger/state".into(),
        }
    }

    fn update(value: f64) -> Update {
        Update {
            id: 1,
            hex_value: String::new(),
            values: HashMap::from([(
                "pressure".to_string(),
                UpdateValue::Numeric { value, avg: value },
            )]),
            count: 1,
            cycle_time_ns: 0,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn test_session_is_owned_by_the_starting_client() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let logger = Logger::spawn(config(&dir), bus);

        logger.enable("console-a", true).await;
        settle().await;
        assert!(logger.is_running());
        assert_eq!(logger.client().as_deref(), Some("console-a"));

        // A non-owner cannot stop it
        logger.enable("console-b", false).await;
        settle().await;
        assert!(logger.is_running());

        // The owner can
        logger.enable("console-a", false).await;
        settle().await;
        assert!(!logger.is_running());
        assert_eq!(logger.client(), None);
    }

    #[tokio::test]
    async fn test_stop_flushes_buffers_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let logger = Logger::spawn(config(&dir), bus);

        logger.enable("console", true).await;
        settle().await;

        logger.updates().send(update(3.25)).await.unwrap();
        logger.updates().send(update(4.5)).await.unwrap();
        settle().await;

        logger.enable("console", false).await;
        settle().await;

        let field_dir = dir.path().join("pressure");
        let entry = std::fs::read_dir(&field_dir).unwrap().next().unwrap().unwrap();
        let content = std::fs::read_to_string(entry.path()).unwrap();
        assert!(content.contains(",\"3.25\"\n"));
        assert!(content.contains(",\"4.5\"\n"));
    }

    #[tokio::test]
    async fn test_reenabling_starts_a_new_file_set() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let logger = Logger::spawn(config(&dir), bus);

        logger.enable("a", true).await;
        settle().await;
        logger.updates().send(update(1.0)).await.unwrap();
        settle().await;
        logger.enable("a", false).await;
        settle().await;

        // Any client may start the next session
        logger.enable("b", true).await;
        settle().await;
        logger.updates().send(update(2.0)).await.unwrap();
        settle().await;
        logger.enable("b", false).await;
        settle().await;

        let field_dir = dir.path().join("pressure");
        let files: Vec<_> = std::fs::read_dir(&field_dir).unwrap().collect();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_state_transitions_are_published() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let logger = Logger::spawn(config(&dir), bus.clone());

        logger.enable("console", true).await;
        settle().await;
        logger.enable("console", false).await;
        settle().await;

        let sent = bus.sent.lock();
        assert_eq!(
            *sent,
            vec![
                ("logger/state".to_string(), serde_json::json!(true)),
                ("logger/state".to_string(), serde_json::json!(false)),
            ]
        );
    }

    #[tokio::test]
    async fn test_updates_without_a_session_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let logger = Logger::spawn(config(&dir), bus);

        logger.updates().send(update(9.0)).await.unwrap();
        settle().await;

        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_dump_threshold_flushes_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let bus = RecordingBus::new();
        let mut cfg = config(&dir);
        // threshold = dump_size / row_size = 1: second update triggers a dump
        cfg.dump_size = 32;
        cfg.row_size = 32;
        let logger = Logger::spawn(cfg, bus);

        logger.enable("console", true).await;
        settle().await;
        logger.updates().send(update(1.0)).await.unwrap();
        logger.updates().send(update(2.0)).await.unwrap();
        settle().await;

        // Still running, but rows are already on disk
        assert!(logger.is_running());
        let field_dir = dir.path().join("pressure");
        let entry = std::fs::read_dir(&field_dir).unwrap().next().unwrap().unwrap();
        let content = std::fs::read_to_string(entry.path()).unwrap();
        assert!(content.contains("\"1\""));
        assert!(content.contains("\"2\""));

        logger.enable("console", false).await;
    }
}
