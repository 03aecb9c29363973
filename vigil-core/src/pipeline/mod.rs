//! Detection event pipeline
//!
//! The front door for raw detection events. Each event flows through:
//!
//! ```text
//! RawEvent ─► normalize ─► dedup ─► ┬─► in-memory window (aggregations)
//!                                   ├─► delivery batcher (low latency)
//!                                   ├─► offline queue   (durability)
//!                                   └─► broadcast       (observers)
//! ```
//!
//! Duplicates are flagged and returned but never forwarded. Accepted events
//! take BOTH delivery paths; the ingestion server deduplicates by stable
//! event id, so at-least-once is the contract here.

mod aggregate;
mod dedup;
mod normalize;

pub use aggregate::aggregate_events;
pub use dedup::{deduplicate_events, Deduplicator, CONFIDENCE_SIMILARITY, DEDUP_WINDOW_MS};
pub use normalize::{derive_event_id, normalize};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::config::Config;
use crate::delivery::{BatcherStats, DeliveryBatcher, SubmitEvent};
use crate::offline::{BlobStore, OfflineQueue, SyncTransport};
use crate::types::{Aggregation, EventType, ProcessedEvent, QueueStatus, RawEvent};

/// Capacity of the observer channel; slow subscribers lag, never block
const BROADCAST_CAPACITY: usize = 256;

/// Orchestrates the full path from raw detection to durable delivery.
///
/// All collaborators are injected at construction; nothing here reaches for
/// process-wide state. Must be created inside a tokio runtime (the batcher
/// and offline queue each own a worker task).
pub struct EventPipeline {
    dedup: Deduplicator,
    events: Vec<ProcessedEvent>,
    max_events: usize,
    batcher: DeliveryBatcher,
    offline: OfflineQueue,
    observers: broadcast::Sender<ProcessedEvent>,
}

impl EventPipeline {
    pub fn new(
        config: &Config,
        submitter: Arc<dyn SubmitEvent>,
        transport: Arc<dyn SyncTransport>,
        store: Box<dyn BlobStore>,
        online: watch::Receiver<bool>,
    ) -> Self {
        let batcher = DeliveryBatcher::new(&config.delivery, submitter);
        let offline = OfflineQueue::new(&config.offline, store, transport, online);
        let (observers, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            dedup: Deduplicator::new(),
            events: Vec::new(),
            max_events: config.pipeline.max_events,
            batcher,
            offline,
            observers,
        }
    }

    /// Process one raw detection event.
    ///
    /// Returns the processed event; `is_duplicate` tells the caller whether
    /// it was forwarded. Never fails: downstream delivery problems are the
    /// batcher's and queue's to retry, not the sensor's.
    pub fn process_event(&mut self, raw: RawEvent) -> ProcessedEvent {
        let mut event = normalize(&raw);

        if self.dedup.check(&event) {
            event.is_duplicate = true;
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Suppressed duplicate event"
            );
            return event;
        }

        self.events.push(event.clone());
        if self.events.len() > self.max_events {
            let overflow = self.events.len() - self.max_events;
            self.events.drain(..overflow);
        }

        self.batcher.enqueue(event.clone());
        self.offline.add_event(event.clone());
        // Err here just means nobody is subscribed right now
        let _ = self.observers.send(event.clone());

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            session_id = %event.session_id,
            "Accepted detection event"
        );
        event
    }

    /// Subscribe to accepted (non-duplicate) events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessedEvent> {
        self.observers.subscribe()
    }

    /// Accepted events currently retained in memory, oldest first.
    pub fn events(&self) -> &[ProcessedEvent] {
        &self.events
    }

    /// Per-type aggregations over the retained window.
    pub fn aggregations(&self) -> HashMap<EventType, Aggregation> {
        aggregate_events(&self.events)
    }

    /// Live offline queue status.
    pub fn queue_status(&self) -> QueueStatus {
        self.offline.status()
    }

    /// Trigger an offline queue sync pass now.
    pub async fn sync_now(&self) -> usize {
        self.offline.sync_now().await
    }

    /// Ask the batcher to flush its buffer now.
    pub fn flush(&self) {
        self.batcher.flush();
    }

    /// Delivery batcher counters.
    pub fn batcher_stats(&self) -> BatcherStats {
        self.batcher.stats()
    }

    /// Stop both worker tasks and drop retained state.
    ///
    /// Unsynced offline entries stay persisted for the next initialization.
    pub fn cleanup(&mut self) {
        self.batcher.shutdown();
        self.offline.cleanup();
        self.events.clear();
        self.dedup = Deduplicator::new();
    }
}
