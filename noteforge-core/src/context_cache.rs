//! Per-user context cache (C6): lazily creates and caches a
//! [`MessageAggregator`] and an agent handle per user, with a sharded
//! lock table so two different users' first-message initialization never
//! blocks on each other.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use crate::agent::Agent;
use crate::aggregator::MessageAggregator;
use crate::types::{BotMode, IncomingMessage, MessageGroup};

type DispatchCallback = Arc<dyn Fn(i64, MessageGroup) + Send + Sync>;
type AgentFactory = Arc<dyn Fn(i64) -> Arc<dyn Agent> + Send + Sync>;

struct Entry {
    aggregator: Arc<MessageAggregator>,
    agent: Arc<dyn Agent>,
    kb_path: PathBuf,
    mode: BotMode,
}

/// Sharded per-user lock table backing [`UserContextCache`]. An outer
/// mutex over a small per-user lock map means two different users'
/// first-access initialization proceeds in parallel, while repeated
/// access by the same user serializes on that user's own lock.
struct LockTable {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, user_id: i64) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .expect("lock table poisoned")
            .entry(user_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn remove(&self, user_id: i64) {
        self.locks.lock().expect("lock table poisoned").remove(&user_id);
    }
}

/// Caches one aggregator, agent handle, and KB path per user. No TTL:
/// entries live until explicitly invalidated.
pub struct UserContextCache {
    entries: Mutex<HashMap<i64, Entry>>,
    lock_table: LockTable,
    group_timeout: Duration,
    tick: Duration,
    on_dispatch: DispatchCallback,
    agent_factory: AgentFactory,
}

impl UserContextCache {
    pub fn new<F, G>(group_timeout: Duration, tick: Duration, on_dispatch: F, agent_factory: G) -> Self
    where
        F: Fn(i64, MessageGroup) + Send + Sync + 'static,
        G: Fn(i64) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            entries: Mutex::new(HashMap::new()),
            lock_table: LockTable::new(),
            group_timeout,
            tick,
            on_dispatch: Arc::new(on_dispatch),
            agent_factory: Arc::new(agent_factory),
        }
    }

    /// Fetch the user's aggregator, creating it (and seeding `kb_path`/
    /// `mode`/`agent`) on first access.
    pub async fn get_or_create_aggregator(
        &self,
        user_id: i64,
        kb_path: PathBuf,
        mode: BotMode,
    ) -> Arc<MessageAggregator> {
        let lock = self.lock_table.lock_for(user_id);
        let _guard = lock.lock().await;

        if let Some(entry) = self.entries.lock().expect("context cache poisoned").get(&user_id) {
            return entry.aggregator.clone();
        }

        let on_dispatch = self.on_dispatch.clone();
        let aggregator = Arc::new(MessageAggregator::spawn(
            self.group_timeout,
            self.tick,
            move |group| on_dispatch(user_id, group),
        ));
        let agent = (self.agent_factory)(user_id);

        self.entries.lock().expect("context cache poisoned").insert(
            user_id,
            Entry {
                aggregator: aggregator.clone(),
                agent,
                kb_path,
                mode,
            },
        );
        aggregator
    }

    /// Fetch the user's agent handle, creating the same one
    /// `get_or_create_aggregator` would have via the configured factory if
    /// no entry exists yet for this user (that handle is not cached, since
    /// only `get_or_create_aggregator` seeds the `kb_path`/`mode` the
    /// entry otherwise requires).
    pub fn get_or_create_agent(&self, user_id: i64) -> Arc<dyn Agent> {
        self.entries
            .lock()
            .expect("context cache poisoned")
            .get(&user_id)
            .map(|e| e.agent.clone())
            .unwrap_or_else(|| (self.agent_factory)(user_id))
    }

    /// The cached KB path and mode for a user, if initialized.
    pub fn get_context(&self, user_id: i64) -> Option<(PathBuf, BotMode)> {
        self.entries
            .lock()
            .expect("context cache poisoned")
            .get(&user_id)
            .map(|e| (e.kb_path.clone(), e.mode))
    }

    /// Stop the user's aggregator, drop their cached agent handle, and
    /// remove their cached entry.
    pub fn invalidate(&self, user_id: i64) {
        if let Some(entry) = self.entries.lock().expect("context cache poisoned").remove(&user_id) {
            entry.aggregator.stop();
            drop(entry.agent);
        }
        self.lock_table.remove(user_id);
    }

    pub fn add_message(&self, user_id: i64, message: IncomingMessage) -> bool {
        match self.entries.lock().expect("context cache poisoned").get(&user_id) {
            Some(entry) => {
                entry.aggregator.add(message);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::test_support::ScriptedAgent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_agent_factory() -> (impl Fn(i64) -> Arc<dyn Agent>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let c = created.clone();
        (
            move |_user_id: i64| {
                c.fetch_add(1, Ordering::SeqCst);
                Arc::new(ScriptedAgent::new(vec![])) as Arc<dyn Agent>
            },
            created,
        )
    }

    #[tokio::test]
    async fn creates_aggregator_once_per_user() {
        let dispatches = Arc::new(AtomicUsize::new(0));
        let d = dispatches.clone();
        let (agent_factory, _created) = counting_agent_factory();
        let cache = UserContextCache::new(
            Duration::from_millis(30),
            Duration::from_millis(5),
            move |_uid, _group| {
                d.fetch_add(1, Ordering::SeqCst);
            },
            agent_factory,
        );

        let a1 = cache
            .get_or_create_aggregator(1, PathBuf::from("/tmp/kb1"), BotMode::Note)
            .await;
        let a2 = cache
            .get_or_create_aggregator(1, PathBuf::from("/tmp/kb1"), BotMode::Note)
            .await;
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[tokio::test]
    async fn get_or_create_agent_caches_the_same_handle() {
        let (agent_factory, created) = counting_agent_factory();
        let cache = UserContextCache::new(Duration::from_millis(30), Duration::from_millis(5), |_, _| {}, agent_factory);

        cache
            .get_or_create_aggregator(1, PathBuf::from("/tmp/kb1"), BotMode::Note)
            .await;
        let a1 = cache.get_or_create_agent(1);
        let a2 = cache.get_or_create_agent(1);
        assert!(Arc::ptr_eq(&a1, &a2));
        assert_eq!(created.load(Ordering::SeqCst), 1, "agent factory should run once per user");
    }

    #[tokio::test]
    async fn invalidate_removes_context() {
        let (agent_factory, _created) = counting_agent_factory();
        let cache = UserContextCache::new(Duration::from_millis(30), Duration::from_millis(5), |_, _| {}, agent_factory);
        cache
            .get_or_create_aggregator(1, PathBuf::from("/tmp/kb1"), BotMode::Note)
            .await;
        assert!(cache.get_context(1).is_some());
        cache.invalidate(1);
        assert!(cache.get_context(1).is_none());
    }

    #[tokio::test]
    async fn different_users_get_independent_aggregators() {
        let (agent_factory, _created) = counting_agent_factory();
        let cache = UserContextCache::new(Duration::from_millis(30), Duration::from_millis(5), |_, _| {}, agent_factory);
        let a1 = cache
            .get_or_create_aggregator(1, PathBuf::from("/tmp/kb1"), BotMode::Note)
            .await;
        let a2 = cache
            .get_or_create_aggregator(2, PathBuf::from("/tmp/kb2"), BotMode::Note)
            .await;
        assert!(!Arc::ptr_eq(&a1, &a2));
    }
}
