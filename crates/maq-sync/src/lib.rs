use maq_core::{strip_nulls, BoardState, MachineStatus};
use maq_storage::{StatusStore, BOARD_DOC_PATH};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod wire;
pub mod ws;

pub use ws::WsRemote;

/// Capability the sync layer requires of the shared remote document:
/// durably store a whole JSON document at a path, and feed subscribers
/// full-document snapshots on every replacement (the first delivery being
/// the current content).
///
/// Writes are fire-and-forget: failures are logged by the implementation
/// and never retried or surfaced. A subscription that breaks simply stops
/// delivering; the caller keeps its last-known state.
pub trait RemoteDocument: Send + Sync {
    fn write(&self, path: &str, body: Value);
    fn subscribe(&self, path: &str) -> mpsc::UnboundedReceiver<Value>;
}

/// In-process remote used by tests and by single-process deployments.
/// Mirrors the echo behavior of the hosted backend: a write is delivered to
/// every subscriber of the path, the writer's own subscription included.
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<MemoryRemoteInner>,
}

#[derive(Default)]
struct MemoryRemoteInner {
    documents: HashMap<String, Value>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
    writes: Vec<(String, Value)>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document without notifying subscribers, for test setup.
    pub fn seed(&self, path: &str, body: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.documents.insert(path.to_string(), body);
    }

    /// Every write observed, in order.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn document(&self, path: &str) -> Option<Value> {
        self.inner.lock().unwrap().documents.get(path).cloned()
    }
}

impl RemoteDocument for MemoryRemote {
    fn write(&self, path: &str, body: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.documents.insert(path.to_string(), body.clone());
        inner.writes.push((path.to_string(), body.clone()));
        if let Some(senders) = inner.subscribers.get_mut(path) {
            senders.retain(|sender| sender.send(body.clone()).is_ok());
        }
    }

    fn subscribe(&self, path: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let initial = inner
            .documents
            .get(path)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let _ = tx.send(initial);
        inner
            .subscribers
            .entry(path.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

/// Bidirectional synchronization between the in-memory board and the shared
/// remote document, with loop suppression.
///
/// One instance per client process; the loop-breaker flags are instance
/// fields, so independent engines can run side by side in tests. The
/// `ignore_next` flag has a known race: if two remote deliveries and a
/// local mutation interleave within one event-loop turn, one publish can
/// slip through or be wrongly eaten. That is a property of the deployed
/// design and is kept, not fixed.
pub struct SyncEngine<R: RemoteDocument> {
    remote: std::sync::Arc<R>,
    mirror: Option<StatusStore>,
    board: BoardState,
    ignore_next: bool,
    published_once: bool,
}

impl<R: RemoteDocument> SyncEngine<R> {
    pub fn new(remote: std::sync::Arc<R>, mirror: Option<StatusStore>) -> Self {
        let mut board = BoardState::new();
        if let Some(store) = &mirror {
            match store.load_board() {
                Ok(Some(mirrored)) => {
                    info!(event = "mirror_seed", machines = mirrored.len());
                    board = mirrored;
                }
                Ok(None) => {}
                Err(err) => warn!(event = "mirror_load_error", error = %err),
            }
        }
        Self {
            remote,
            mirror,
            board,
            ignore_next: false,
            published_once: false,
        }
    }

    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Value> {
        self.remote.subscribe(BOARD_DOC_PATH)
    }

    /// Applies a full-document snapshot from the change feed. Only a
    /// non-empty payload replaces the board; the backend delivers `{}` for
    /// a document that has never been written and that must not wipe
    /// whatever the mirror seeded. Any delivery, empty included, counts as
    /// the first load. Returns whether the board was replaced; callers run
    /// one `publish` attempt after an applied payload to consume the echo.
    pub fn apply_remote(&mut self, payload: &Value) -> bool {
        self.published_once = true;
        let incoming = BoardState::from_value(payload);
        if incoming.is_empty() {
            debug!(event = "remote_empty_ignored");
            return false;
        }
        self.ignore_next = true;
        self.board.replace_all(incoming);
        self.write_mirror();
        info!(event = "remote_applied", machines = self.board.len());
        true
    }

    /// Local user-initiated mutation: update the board, write through to
    /// the mirror, and publish. Returns whether a remote write happened.
    pub fn set_status(&mut self, machine_id: &str, status: MachineStatus) -> bool {
        self.board.set(machine_id, status);
        self.write_mirror();
        self.publish()
    }

    /// Publishes the whole board to the remote document, unless suppressed.
    /// Suppression is one-shot in both cases: the attempt right after a
    /// remote replacement (loop breaking) and the first attempt before any
    /// remote delivery (nothing meaningful to publish before first load).
    pub fn publish(&mut self) -> bool {
        let first_attempt = !self.published_once;
        self.published_once = true;
        if self.ignore_next {
            self.ignore_next = false;
            debug!(event = "publish_suppressed", reason = "remote_echo");
            return false;
        }
        if first_attempt {
            debug!(event = "publish_suppressed", reason = "first_attempt");
            return false;
        }
        let body = strip_nulls(self.board.to_value());
        self.remote.write(BOARD_DOC_PATH, body);
        true
    }

    fn write_mirror(&self) {
        if let Some(store) = &self.mirror {
            if let Err(err) = store.save_board(&self.board) {
                warn!(event = "mirror_write_error", error = %err);
            }
        }
    }
}
