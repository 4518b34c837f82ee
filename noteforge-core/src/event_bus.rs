//! Typed pub/sub event bus (C4) for knowledge-base change notifications.
//!
//! Synchronous subscribers run inline before `publish` returns. Async
//! subscribers are posted to a bounded worker pool rather than spawned one
//! task per event, so a slow or wedged handler cannot cause unbounded task
//! growth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::types::KbChangeEvent;

type SyncHandler = Box<dyn Fn(&KbChangeEvent) + Send + Sync>;
type AsyncHandler = Arc<dyn Fn(KbChangeEvent) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

/// Handle returned by `subscribe`/`subscribe_async`; dropping it or calling
/// `unsubscribe()` removes the handler.
pub struct Unsubscribe {
    kind: &'static str,
    id: u64,
    bus: EventBus,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        // Drop performs the removal.
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.bus.remove(self.kind, self.id);
    }
}

struct Inner {
    sync_handlers: Mutex<HashMap<&'static str, Vec<(u64, SyncHandler)>>>,
    async_handlers: Mutex<HashMap<&'static str, Vec<(u64, AsyncHandler)>>>,
    next_id: Mutex<u64>,
    worker_tx: mpsc::Sender<(AsyncHandler, KbChangeEvent)>,
}

/// Cloneable handle to the bus; all clones share the same subscriber
/// tables and worker pool.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// `worker_pool_size` bounds how many async handler invocations run
    /// concurrently; `queue_capacity` bounds how many are buffered before
    /// `publish` starts applying backpressure to async dispatch.
    pub fn new(worker_pool_size: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let inner = Arc::new(Inner {
            sync_handlers: Mutex::new(HashMap::new()),
            async_handlers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
            worker_tx: tx,
        });
        spawn_worker_pool(rx, worker_pool_size);
        Self { inner }
    }

    fn allocate_id(&self) -> u64 {
        let mut guard = self.inner.next_id.lock().expect("event bus lock poisoned");
        *guard += 1;
        *guard
    }

    fn remove(&self, kind: &'static str, id: u64) {
        if let Ok(mut handlers) = self.inner.sync_handlers.lock() {
            if let Some(list) = handlers.get_mut(kind) {
                list.retain(|(hid, _)| *hid != id);
            }
        }
        if let Ok(mut handlers) = self.inner.async_handlers.lock() {
            if let Some(list) = handlers.get_mut(kind) {
                list.retain(|(hid, _)| *hid != id);
            }
        }
    }

    /// Register a synchronous handler for events whose `kind()` matches
    /// `kind`. Runs inline, before `publish` returns.
    pub fn subscribe<F>(&self, kind: &'static str, handler: F) -> Unsubscribe
    where
        F: Fn(&KbChangeEvent) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.inner
            .sync_handlers
            .lock()
            .expect("event bus lock poisoned")
            .entry(kind)
            .or_default()
            .push((id, Box::new(handler)));
        Unsubscribe {
            kind,
            id,
            bus: self.clone(),
        }
    }

    /// Register an async handler. Each matching event is posted to the
    /// bounded worker pool; `publish` does not wait for async handlers to
    /// finish.
    pub fn subscribe_async<F, Fut>(&self, kind: &'static str, handler: F) -> Unsubscribe
    where
        F: Fn(KbChangeEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.allocate_id();
        let wrapped: AsyncHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner
            .async_handlers
            .lock()
            .expect("event bus lock poisoned")
            .entry(kind)
            .or_default()
            .push((id, wrapped));
        Unsubscribe {
            kind,
            id,
            bus: self.clone(),
        }
    }

    /// Deliver `event` to every handler subscribed to its `kind()`.
    pub fn publish(&self, event: KbChangeEvent) {
        let kind = event.kind();

        if let Ok(handlers) = self.inner.sync_handlers.lock() {
            if let Some(list) = handlers.get(kind) {
                for (_, handler) in list {
                    handler(&event);
                }
            }
        }

        let async_targets: Vec<AsyncHandler> = self
            .inner
            .async_handlers
            .lock()
            .ok()
            .and_then(|h| h.get(kind).cloned())
            .unwrap_or_default()
            .into_iter()
            .map(|(_, handler)| handler)
            .collect();

        for handler in async_targets {
            if let Err(err) = self.inner.worker_tx.try_send((handler, event.clone())) {
                warn!("event bus worker pool saturated, dropping async dispatch: {err}");
            }
        }
    }
}

fn spawn_worker_pool(rx: mpsc::Receiver<(AsyncHandler, KbChangeEvent)>, pool_size: usize) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for _ in 0..pool_size.max(1) {
        let rx = rx.clone();
        tokio::spawn(async move {
            loop {
                let next = { rx.lock().await.recv().await };
                match next {
                    Some((handler, event)) => handler(event).await,
                    None => break,
                }
            }
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Mirrors the teacher's gateway default worker sizing.
        Self::new(4, 256)
    }
}
