//! Offline durable queue
//!
//! The durability backstop of the pipeline: every accepted event is recorded
//! here regardless of network state and retried until confirmed synced. The
//! queue persists its full state to a [`BlobStore`] on every mutation, so it
//! survives process restarts, and it reacts to connectivity transitions by
//! syncing immediately when the session comes back online.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  add_event   ┌──────────────────┐  sync batch  ┌───────────────┐
//! │ EventPipeline│ ───────────► │   OfflineQueue   │ ───────────► │ SyncTransport │
//! └──────────────┘              │  (worker task)   │              └───────────────┘
//!                               │   ▲    ▲    ▲    │
//!                               └───┼────┼────┼────┘
//!                          sync timer  online  nudge
//!                                      watch
//! ```
//!
//! Entry lifecycle: `pending` → removed on confirmed sync, or `pending` →
//! `exhausted` once `retry_count` reaches the attempt ceiling. Exhausted
//! entries stay visible in [`QueueStatus`] until cleared or evicted by
//! size/age.

mod store;

pub use store::{BlobStore, MemoryStore, SqliteStore};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::OfflineConfig;
use crate::error::Result;
use crate::types::{ProcessedEvent, QueueStatus, QueuedEvent};

/// Fixed storage key for the serialized queue blob
pub const QUEUE_STORE_KEY: &str = "vigil.offline-queue.v1";

/// Entries older than this are dropped when the queue loads persisted state
pub const RETENTION_HOURS: i64 = 24;

/// Durable sync collaborator: one call per eligible batch.
///
/// `Ok(false)` is an application-level "try again later"; the queue treats
/// it exactly like a transport error for retry purposes.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn sync(&self, events: &[ProcessedEvent]) -> Result<bool>;
}

/// The single persisted blob: the full queue plus the write time
#[derive(Debug, Serialize, Deserialize)]
struct PersistedQueue {
    queue: Vec<QueuedEvent>,
    timestamp: DateTime<Utc>,
}

/// Load the persisted queue from storage.
///
/// Storage and deserialization failures are logged and swallowed: the queue
/// continues memory-only rather than crashing the session.
pub fn load_queue(store: &dyn BlobStore) -> Vec<QueuedEvent> {
    let blob = match store.get(QUEUE_STORE_KEY) {
        Ok(Some(blob)) => blob,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read persisted queue, starting empty");
            return Vec::new();
        }
    };

    match serde_json::from_str::<PersistedQueue>(&blob) {
        Ok(persisted) => persisted.queue,
        Err(e) => {
            tracing::warn!(error = %e, "Persisted queue is corrupt, starting empty");
            Vec::new()
        }
    }
}

/// Persist the full queue as one atomic write.
///
/// Failures are logged and swallowed; the in-memory queue stays
/// authoritative for this process.
pub fn save_queue(store: &dyn BlobStore, queue: &[QueuedEvent]) {
    let persisted = PersistedQueue {
        queue: queue.to_vec(),
        timestamp: Utc::now(),
    };
    match serde_json::to_string(&persisted) {
        Ok(blob) => {
            if let Err(e) = store.set(QUEUE_STORE_KEY, &blob) {
                tracing::warn!(error = %e, "Failed to persist offline queue");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize offline queue");
        }
    }
}

/// Compute a live status snapshot for a queue.
pub fn status_of(queue: &[QueuedEvent], retry_attempts: u32) -> QueueStatus {
    let failed = queue
        .iter()
        .filter(|e| e.is_exhausted(retry_attempts))
        .count();
    QueueStatus {
        total: queue.len(),
        pending: queue.len() - failed,
        failed,
        oldest: queue.iter().map(|e| e.enqueued_at).min(),
        newest: queue.iter().map(|e| e.enqueued_at).max(),
    }
}

struct Inner {
    config: OfflineConfig,
    store: Box<dyn BlobStore>,
    transport: Arc<dyn SyncTransport>,
    state: Mutex<Vec<QueuedEvent>>,
    online: watch::Receiver<bool>,
    nudge: Notify,
    shutdown: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Vec<QueuedEvent>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Enqueue, evict beyond the size bound (oldest first), persist.
    fn add_event(&self, event: ProcessedEvent) {
        {
            let mut queue = self.lock();
            queue.push(QueuedEvent::new(event));

            if queue.len() > self.config.max_queue_size {
                let overflow = queue.len() - self.config.max_queue_size;
                queue.drain(..overflow);
                tracing::warn!(evicted = overflow, "Offline queue full, evicted oldest entries");
            }

            save_queue(self.store.as_ref(), &queue);
        }

        if self.is_online() {
            self.nudge.notify_one();
        }
    }

    /// Run one sync pass; returns the number of entries confirmed synced.
    ///
    /// Selects entries still inside their retry budget whose last attempt is
    /// older than the retry delay, and hands the whole eligible batch to the
    /// transport in a single call. On failure every attempted entry gets its
    /// retry state bumped, not just some.
    async fn sync_events(&self) -> usize {
        if !self.is_online() {
            tracing::debug!("Offline, skipping sync");
            return 0;
        }

        let now = Utc::now();
        let retry_delay = Duration::milliseconds(self.config.retry_delay_ms as i64);
        let eligible: Vec<ProcessedEvent> = {
            let queue = self.lock();
            queue
                .iter()
                .filter(|entry| {
                    entry.retry_count < self.config.retry_attempts
                        && entry.last_attempt.map_or(true, |t| now - t > retry_delay)
                })
                .map(|entry| entry.event.clone())
                .collect()
        };

        if eligible.is_empty() {
            return 0;
        }

        let ids: Vec<String> = eligible.iter().map(|e| e.id.clone()).collect();
        let outcome = self.transport.sync(&eligible).await;

        let mut queue = self.lock();
        match outcome {
            Ok(true) => {
                queue.retain(|entry| !ids.contains(&entry.event.id));
                save_queue(self.store.as_ref(), &queue);
                tracing::info!(synced = ids.len(), remaining = queue.len(), "Queue sync succeeded");
                ids.len()
            }
            Ok(false) | Err(_) => {
                if let Err(e) = &outcome {
                    tracing::warn!(error = %e, attempted = ids.len(), "Queue sync failed");
                } else {
                    tracing::warn!(attempted = ids.len(), "Queue sync rejected by server");
                }
                let now = Utc::now();
                for entry in queue.iter_mut().filter(|e| ids.contains(&e.event.id)) {
                    entry.retry_count += 1;
                    entry.last_attempt = Some(now);
                    if entry.is_exhausted(self.config.retry_attempts) {
                        tracing::warn!(
                            event_id = %entry.event.id,
                            retry_count = entry.retry_count,
                            "Queue entry exhausted its retry budget"
                        );
                    }
                }
                save_queue(self.store.as_ref(), &queue);
                0
            }
        }
    }
}

/// Process-wide durable buffer for accepted events.
///
/// Collaborators (storage, sync transport, connectivity signal) are injected
/// at construction; lifecycle is explicit via [`OfflineQueue::cleanup`].
/// Must be created inside a tokio runtime: a worker task owns the sync timer.
pub struct OfflineQueue {
    inner: Arc<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl OfflineQueue {
    /// Load persisted state, prune stale entries, and start the sync worker.
    pub fn new(
        config: &OfflineConfig,
        store: Box<dyn BlobStore>,
        transport: Arc<dyn SyncTransport>,
        online: watch::Receiver<bool>,
    ) -> Self {
        let mut queue = load_queue(store.as_ref());
        let loaded = queue.len();

        // Retention prune happens at load time, not just at write time
        let horizon = Utc::now() - Duration::hours(RETENTION_HOURS);
        queue.retain(|entry| entry.enqueued_at > horizon);

        if queue.len() > config.max_queue_size {
            let overflow = queue.len() - config.max_queue_size;
            queue.drain(..overflow);
        }

        if queue.len() != loaded {
            tracing::info!(
                loaded,
                retained = queue.len(),
                "Pruned persisted queue on load"
            );
            save_queue(store.as_ref(), &queue);
        } else if loaded > 0 {
            tracing::info!(loaded, "Resuming persisted offline queue");
        }

        let inner = Arc::new(Inner {
            config: config.clone(),
            store,
            transport,
            state: Mutex::new(queue),
            online,
            nudge: Notify::new(),
            shutdown: Notify::new(),
        });

        let worker = tokio::spawn(run(Arc::clone(&inner)));

        Self {
            inner,
            worker: Some(worker),
        }
    }

    /// Record an accepted event for durable delivery.
    ///
    /// Always succeeds from the caller's perspective; persistence failures
    /// are logged and the entry is kept in memory.
    pub fn add_event(&self, event: ProcessedEvent) {
        self.inner.add_event(event);
    }

    /// Trigger a sync pass now; returns the number of entries synced.
    pub async fn sync_now(&self) -> usize {
        self.inner.sync_events().await
    }

    /// Live queue status; computed from current state, never cached.
    pub fn status(&self) -> QueueStatus {
        let queue = self.inner.lock();
        status_of(&queue, self.inner.config.retry_attempts)
    }

    /// Remove entries that exhausted their retry budget.
    ///
    /// Returns the number of entries cleared.
    pub fn clear_failed(&self) -> usize {
        let mut queue = self.inner.lock();
        let before = queue.len();
        let attempts = self.inner.config.retry_attempts;
        queue.retain(|entry| !entry.is_exhausted(attempts));
        let cleared = before - queue.len();
        if cleared > 0 {
            save_queue(self.inner.store.as_ref(), &queue);
            tracing::info!(cleared, "Cleared failed queue entries");
        }
        cleared
    }

    /// Current connectivity as seen by the queue.
    pub fn is_online(&self) -> bool {
        self.inner.is_online()
    }

    /// Stop the worker and detach the connectivity subscription.
    ///
    /// Does not flush: unsynced entries remain persisted for the next
    /// initialization.
    pub fn cleanup(&mut self) {
        self.inner.shutdown.notify_one();
        self.worker.take();
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        self.inner.shutdown.notify_one();
    }
}

/// Worker loop: periodic sync timer, connectivity transitions, and nudges
/// from `add_event`/manual sync.
async fn run(inner: Arc<Inner>) {
    let mut online = inner.online.clone();
    let mut connectivity_open = true;
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
        inner.config.sync_interval_ms.max(1),
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if inner.is_online() && !inner.is_empty() {
                    inner.sync_events().await;
                }
            }
            changed = online.changed(), if connectivity_open => match changed {
                Ok(()) => {
                    if *online.borrow_and_update() {
                        tracing::info!("Connectivity restored, syncing queued events");
                        inner.sync_events().await;
                    } else {
                        tracing::info!("Connectivity lost, queueing events locally");
                    }
                }
                Err(_) => {
                    // Connectivity source dropped; keep running on the timer
                    connectivity_open = false;
                }
            },
            _ = inner.nudge.notified() => {
                inner.sync_events().await;
            }
            _ = inner.shutdown.notified() => return,
        }
    }
}
