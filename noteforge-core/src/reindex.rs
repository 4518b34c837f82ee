//! Vector reindex manager (C12): debounces knowledge-base change events per
//! `kb_id` and drives the Hub's `reindex_vector`/`get_reindex_status` tools.
//!
//! State machine per `kb_id`: `Idle -> Pending -> Dispatching -> Idle`. A
//! new event while `Pending` resets the debounce window (grounded on
//! `rustant-core::scheduler::jobs::BackgroundJob`'s state-transition shape,
//! adapted from a one-shot job state machine to a per-key debounce timer).
//! A dispatch request that arrives while `Dispatching` sets a "dirty" flag
//! instead of firing concurrently; the dirty kb is redispatched as soon as
//! the in-flight reindex completes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use noteforge_mcp::McpError;

use crate::event_bus::EventBus;
use crate::mcp_manager::McpServerManager;
use crate::types::{KbChangeEvent, ReindexStatus};

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_millis(250);

const WATCHED_EVENT_KINDS: &[&str] = &[
    "FileCreated",
    "FileModified",
    "FileDeleted",
    "BatchChanges",
    "GitCommit",
    "GitPull",
];

/// Drives the actual `reindex_vector`/`get_reindex_status` MCP calls. Kept
/// as a trait, implemented for [`McpServerManager`], so the debounce state
/// machine can be tested without a live Hub.
#[async_trait]
pub trait ReindexBackend: Send + Sync {
    async fn start_reindex(&self, kb_id: &str, force: bool) -> Result<(), McpError>;
    async fn poll_status(&self, kb_id: &str) -> Result<ReindexStatus, McpError>;
}

#[async_trait]
impl ReindexBackend for McpServerManager {
    async fn start_reindex(&self, kb_id: &str, force: bool) -> Result<(), McpError> {
        self.client()
            .await
            .call_tool(
                "reindex_vector",
                serde_json::json!({ "kb_id": kb_id, "force": force }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn poll_status(&self, kb_id: &str) -> Result<ReindexStatus, McpError> {
        let raw = self
            .client()
            .await
            .call_tool(
                "get_reindex_status",
                serde_json::json!({ "kb_id": kb_id }),
                None,
            )
            .await?;
        let parsed = parse_tool_result(raw)?;
        Ok(serde_json::from_value(parsed["status"].clone())?)
    }
}

/// Hub tools encode their structured payload as a JSON string inside the
/// first text content block, per `CallToolResult::text`.
fn parse_tool_result(value: serde_json::Value) -> Result<serde_json::Value, McpError> {
    let text = value["content"][0]["text"]
        .as_str()
        .ok_or_else(|| McpError::InvalidParams {
            message: "tool result missing text content".to_string(),
        })?;
    Ok(serde_json::from_str(text)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KbState {
    Idle,
    Pending,
    Dispatching,
}

struct KbEntry {
    state: KbState,
    last_event: TokioInstant,
    dirty: bool,
}

impl KbEntry {
    fn idle() -> Self {
        Self {
            state: KbState::Idle,
            last_event: TokioInstant::now(),
            dirty: false,
        }
    }
}

/// Record a change for `kb_id`, starting or resetting its debounce window.
/// A kb mid-dispatch is marked dirty instead. Standalone so event-bus
/// handlers can call it before the owning `Arc<ReindexManager>` exists.
fn record_event(kbs: &Mutex<HashMap<String, KbEntry>>, kb_id: String) {
    let mut kbs = kbs.lock().expect("reindex manager lock poisoned");
    let entry = kbs.entry(kb_id).or_insert_with(KbEntry::idle);
    match entry.state {
        KbState::Idle => {
            entry.state = KbState::Pending;
            entry.last_event = TokioInstant::now();
        }
        KbState::Pending => {
            entry.last_event = TokioInstant::now();
        }
        KbState::Dispatching => {
            entry.dirty = true;
        }
    }
}

/// Coordinates debounced reindex dispatch across every known `kb_id`.
pub struct ReindexManager {
    kbs: Arc<Mutex<HashMap<String, KbEntry>>>,
    backend: Arc<dyn ReindexBackend>,
    cancel: CancellationToken,
    // Kept alive for the manager's lifetime: dropping an `Unsubscribe`
    // removes its handler from the bus.
    _subscriptions: Vec<crate::event_bus::Unsubscribe>,
}

impl ReindexManager {
    /// Subscribes to the watched event kinds on `event_bus` and starts the
    /// debounce ticker plus the 5-minute fallback sweep. `kb_resolver` maps
    /// a `user_id` to its `kb_id` (mirrors `UserKbConfig` lookup in C2).
    pub fn spawn<F>(event_bus: &EventBus, backend: Arc<dyn ReindexBackend>, kb_resolver: F) -> Arc<Self>
    where
        F: Fn(i64) -> Option<String> + Send + Sync + 'static,
    {
        let kb_resolver = Arc::new(kb_resolver);
        let kbs = Arc::new(Mutex::new(HashMap::new()));
        let on_event_kbs = kbs.clone();

        let mut subscriptions = Vec::with_capacity(WATCHED_EVENT_KINDS.len());
        // Handlers record debounce state directly into `kbs` rather than
        // calling back into `ReindexManager`, so subscriptions can be wired
        // up before the `Arc<Self>` exists.
        for &kind in WATCHED_EVENT_KINDS {
            let kbs = on_event_kbs.clone();
            let kb_resolver = kb_resolver.clone();
            let sub = event_bus.subscribe(kind, move |event: &KbChangeEvent| {
                if let Some(kb_id) = event.kb_id(|uid| (*kb_resolver)(uid)) {
                    record_event(&kbs, kb_id);
                }
            });
            subscriptions.push(sub);
        }

        let manager = Arc::new(Self {
            kbs,
            backend,
            cancel: CancellationToken::new(),
            _subscriptions: subscriptions,
        });

        manager.clone().spawn_debounce_ticker();
        manager.clone().spawn_sweep();
        manager
    }

    /// Bypasses the debounce window and dispatches immediately (or marks
    /// the kb dirty if a reindex is already in flight).
    pub fn trigger_reindex(self: &Arc<Self>, kb_id: impl Into<String>) {
        self.dispatch_now(kb_id.into(), true);
    }

    fn dispatch_now(self: &Arc<Self>, kb_id: String, force: bool) {
        {
            let mut kbs = self.kbs.lock().expect("reindex manager lock poisoned");
            let entry = kbs.entry(kb_id.clone()).or_insert_with(KbEntry::idle);
            if entry.state == KbState::Dispatching {
                entry.dirty = true;
                return;
            }
            entry.state = KbState::Dispatching;
            entry.dirty = false;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_reindex(kb_id, force).await;
        });
    }

    async fn run_reindex(self: Arc<Self>, kb_id: String, force: bool) {
        if let Err(err) = self.backend.start_reindex(&kb_id, force).await {
            warn!(kb_id, "reindex_vector dispatch failed: {err}");
            self.finish(kb_id);
            return;
        }

        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            match self.backend.poll_status(&kb_id).await {
                Ok(status) if status.is_terminal() => {
                    debug!(kb_id, ?status, "reindex finished");
                    break;
                }
                Ok(_) => continue,
                Err(err) => {
                    warn!(kb_id, "get_reindex_status failed: {err}");
                    break;
                }
            }
        }

        self.finish(kb_id);
    }

    /// Return a dispatching kb to `Pending` (if it went dirty while
    /// running) or `Idle`, re-arming the debounce window in the dirty case.
    fn finish(self: Arc<Self>, kb_id: String) {
        let mut kbs = self.kbs.lock().expect("reindex manager lock poisoned");
        if let Some(entry) = kbs.get_mut(&kb_id) {
            if entry.dirty {
                entry.state = KbState::Pending;
                entry.last_event = TokioInstant::now();
                entry.dirty = false;
            } else {
                entry.state = KbState::Idle;
            }
        }
    }

    fn spawn_debounce_ticker(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let due: Vec<String> = {
                            let now = TokioInstant::now();
                            let kbs = self.kbs.lock().expect("reindex manager lock poisoned");
                            kbs.iter()
                                .filter(|(_, entry)| {
                                    entry.state == KbState::Pending
                                        && now.duration_since(entry.last_event) >= DEBOUNCE_WINDOW
                                })
                                .map(|(kb_id, _)| kb_id.clone())
                                .collect()
                        };
                        for kb_id in due {
                            self.dispatch_now(kb_id, false);
                        }
                    }
                }
            }
            debug!("reindex debounce ticker stopped");
        });
    }

    fn spawn_sweep(self: Arc<Self>) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let idle_kbs: Vec<String> = {
                            let kbs = self.kbs.lock().expect("reindex manager lock poisoned");
                            kbs.iter()
                                .filter(|(_, entry)| entry.state == KbState::Idle)
                                .map(|(kb_id, _)| kb_id.clone())
                                .collect()
                        };
                        for kb_id in idle_kbs {
                            self.dispatch_now(kb_id, false);
                        }
                    }
                }
            }
            debug!("reindex sweep stopped");
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReindexManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        starts: AtomicUsize,
        terminal_after_polls: usize,
        polls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(terminal_after_polls: usize) -> Self {
            Self {
                starts: AtomicUsize::new(0),
                terminal_after_polls,
                polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReindexBackend for FakeBackend {
        async fn start_reindex(&self, _kb_id: &str, _force: bool) -> Result<(), McpError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn poll_status(&self, _kb_id: &str) -> Result<ReindexStatus, McpError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.terminal_after_polls {
                Ok(ReindexStatus::Completed)
            } else {
                Ok(ReindexStatus::Processing)
            }
        }
    }

    fn file_event(kb_owner: i64) -> KbChangeEvent {
        KbChangeEvent::FileModified {
            path: "/tmp/note.md".into(),
            user_id: Some(kb_owner),
            source: "test".into(),
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn event_debounces_then_dispatches_once() {
        let bus = EventBus::new(2, 16);
        let backend = Arc::new(FakeBackend::new(1));
        let manager = ReindexManager::spawn(&bus, backend.clone(), |uid| Some(format!("kb-{uid}")));

        bus.publish(file_event(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.publish(file_event(1)); // resets the debounce window

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0, "still debouncing");

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
        manager.stop();
    }

    #[tokio::test]
    async fn trigger_reindex_bypasses_debounce() {
        let bus = EventBus::new(2, 16);
        let backend = Arc::new(FakeBackend::new(1));
        let manager = ReindexManager::spawn(&bus, backend.clone(), |uid| Some(format!("kb-{uid}")));

        manager.trigger_reindex("kb-1");
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(backend.starts.load(Ordering::SeqCst), 1);
        manager.stop();
    }

    #[tokio::test]
    async fn concurrent_event_during_dispatch_coalesces_into_next_run() {
        let bus = EventBus::new(2, 16);
        let backend = Arc::new(FakeBackend::new(3));
        let manager = ReindexManager::spawn(&bus, backend.clone(), |uid| Some(format!("kb-{uid}")));

        manager.trigger_reindex("kb-1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish(file_event(1)); // arrives while Dispatching, marks dirty

        // Wait for the first run to finish (3 polls * 500ms) plus the
        // re-armed debounce window and a second run.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert!(backend.starts.load(Ordering::SeqCst) >= 2, "dirty kb should redispatch");
        manager.stop();
    }

    #[tokio::test]
    async fn unresolved_user_id_is_ignored() {
        let bus = EventBus::new(2, 16);
        let backend = Arc::new(FakeBackend::new(1));
        let manager = ReindexManager::spawn(&bus, backend.clone(), |_uid| None);

        bus.publish(file_event(1));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(backend.starts.load(Ordering::SeqCst), 0);
        manager.stop();
    }
}
