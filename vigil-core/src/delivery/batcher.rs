//! Batched event delivery with per-event retry
//!
//! A single worker task owns the buffer: events arrive over a channel, the
//! buffer flushes when it reaches `batch_size` or on the periodic flush
//! timer, and flushes are serialized by construction. Events arriving while
//! a flush is in progress stay queued in the channel (deferred, never
//! dropped), which preserves a rough chronological bias across flushes.
//!
//! Each flushed event is submitted independently and in parallel, with its
//! own linear-backoff retry loop. A flush always settles regardless of
//! individual outcomes; exhausted events are logged and counted but not
//! re-queued.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::DeliveryConfig;
use crate::error::Result;
use crate::types::ProcessedEvent;

/// Network submission collaborator: one call per event.
///
/// Implementations must return an error on any transport or server-side
/// failure; the batcher treats every failure as retryable and makes no
/// 4xx/5xx distinction at this layer.
#[async_trait]
pub trait SubmitEvent: Send + Sync {
    async fn submit(&self, event: &ProcessedEvent) -> Result<()>;
}

/// Delivery statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Events delivered successfully
    pub events_sent: usize,
    /// Events that exhausted their retry budget
    pub events_failed: usize,
    /// Number of flushes performed
    pub flushes: usize,
    /// Events enqueued but not yet resolved
    pub pending: usize,
}

#[derive(Debug, Default)]
struct SharedStats {
    sent: AtomicUsize,
    failed: AtomicUsize,
    flushes: AtomicUsize,
    pending: AtomicUsize,
}

impl SharedStats {
    fn snapshot(&self) -> BatcherStats {
        BatcherStats {
            events_sent: self.sent.load(Ordering::Relaxed),
            events_failed: self.failed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
        }
    }
}

enum Command {
    Event(ProcessedEvent),
    Flush,
    Shutdown,
}

/// Handle to the delivery batcher worker.
///
/// `enqueue` is synchronous and fire-and-forget with respect to network I/O;
/// delivery failures are only observable through [`BatcherStats`] and logs.
pub struct DeliveryBatcher {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<SharedStats>,
    worker: Option<JoinHandle<()>>,
}

impl DeliveryBatcher {
    /// Spawn the worker task that owns the buffer.
    pub fn new(config: &DeliveryConfig, submitter: Arc<dyn SubmitEvent>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(SharedStats::default());

        let worker = tokio::spawn(run(rx, config.clone(), submitter, Arc::clone(&stats)));

        Self {
            tx,
            stats,
            worker: Some(worker),
        }
    }

    /// Hand an accepted event to the worker.
    ///
    /// Never fails from the producer's perspective; if the worker has shut
    /// down the event is silently dropped here (the offline queue still has
    /// it).
    pub fn enqueue(&self, event: ProcessedEvent) {
        self.stats.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(Command::Event(event)).is_err() {
            self.stats.pending.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!("Batcher worker stopped; event not buffered");
        }
    }

    /// Request an out-of-band flush of whatever is buffered.
    pub fn flush(&self) {
        let _ = self.tx.send(Command::Flush);
    }

    /// Current delivery statistics.
    pub fn stats(&self) -> BatcherStats {
        self.stats.snapshot()
    }

    /// Stop the worker and discard the in-memory buffer.
    ///
    /// Does not abort submissions already in flight; their resolution is
    /// simply ignored.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        self.worker.take();
    }
}

impl Drop for DeliveryBatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<Command>,
    config: DeliveryConfig,
    submitter: Arc<dyn SubmitEvent>,
    stats: Arc<SharedStats>,
) {
    let mut buffer: Vec<ProcessedEvent> = Vec::new();
    let mut ticker =
        tokio::time::interval(Duration::from_millis(config.flush_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately on first tick; skip it
    ticker.tick().await;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Event(event)) => {
                    buffer.push(event);
                    if buffer.len() >= config.batch_size {
                        flush_batch(&mut buffer, &config, &submitter, &stats).await;
                        ticker.reset();
                    }
                }
                Some(Command::Flush) => {
                    if !buffer.is_empty() {
                        flush_batch(&mut buffer, &config, &submitter, &stats).await;
                        ticker.reset();
                    }
                }
                Some(Command::Shutdown) | None => {
                    if !buffer.is_empty() {
                        tracing::debug!(
                            discarded = buffer.len(),
                            "Batcher stopping; discarding in-memory buffer"
                        );
                        stats.pending.fetch_sub(buffer.len(), Ordering::Relaxed);
                    }
                    return;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_batch(&mut buffer, &config, &submitter, &stats).await;
                }
            }
        }
    }
}

/// Drain the buffer and submit every event in parallel.
///
/// Settles all submissions before returning; individual failures never fail
/// the flush.
async fn flush_batch(
    buffer: &mut Vec<ProcessedEvent>,
    config: &DeliveryConfig,
    submitter: &Arc<dyn SubmitEvent>,
    stats: &Arc<SharedStats>,
) {
    let events: Vec<ProcessedEvent> = buffer.drain(..).collect();
    stats.flushes.fetch_add(1, Ordering::Relaxed);

    tracing::debug!(count = events.len(), "Flushing event batch");

    let mut handles = Vec::with_capacity(events.len());
    for event in events {
        handles.push(tokio::spawn(deliver_with_retry(
            event,
            config.retry_attempts.max(1),
            config.retry_delay_ms,
            Arc::clone(submitter),
            Arc::clone(stats),
        )));
    }
    for handle in handles {
        let _ = handle.await;
    }
}

/// Submit one event with linear backoff (`retry_delay * attempt`).
async fn deliver_with_retry(
    event: ProcessedEvent,
    attempts: u32,
    retry_delay_ms: u64,
    submitter: Arc<dyn SubmitEvent>,
    stats: Arc<SharedStats>,
) {
    for attempt in 1..=attempts {
        match submitter.submit(&event).await {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
                stats.pending.fetch_sub(1, Ordering::Relaxed);
                return;
            }
            Err(e) if attempt < attempts => {
                tracing::debug!(
                    event_id = %event.id,
                    attempt,
                    error = %e,
                    "Event delivery failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(retry_delay_ms * attempt as u64)).await;
            }
            Err(e) => {
                // Not re-queued: the offline queue is the durability backstop
                tracing::warn!(
                    event_id = %event.id,
                    attempts,
                    error = %e,
                    "Event delivery exhausted retries"
                );
                stats.failed.fetch_add(1, Ordering::Relaxed);
                stats.pending.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::normalize;
    use crate::types::{EventType, RawEvent};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Submitter that records ids and fails the first `fail_first` calls
    /// for each event.
    struct MockSubmitter {
        calls: AtomicUsize,
        fail_first: usize,
        delivered: Mutex<Vec<String>>,
    }

    impl MockSubmitter {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SubmitEvent for MockSubmitter {
        async fn submit(&self, event: &ProcessedEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if call < self.fail_first {
                return Err(Error::Delivery("connection refused".to_string()));
            }
            self.delivered.lock().unwrap().push(event.id.clone());
            Ok(())
        }
    }

    fn test_event(n: i64) -> ProcessedEvent {
        normalize(&RawEvent {
            session_id: "exam-1".to_string(),
            candidate_id: "cand-1".to_string(),
            event_type: EventType::FocusLoss,
            timestamp: Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap(),
            duration_ms: None,
            confidence: 0.8,
            metadata: serde_json::json!({}),
        })
    }

    fn config(batch_size: usize, flush_interval_ms: u64) -> DeliveryConfig {
        DeliveryConfig {
            batch_size,
            flush_interval_ms,
            retry_attempts: 3,
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_batch_size() {
        let submitter = MockSubmitter::new(0);
        let batcher = DeliveryBatcher::new(&config(5, 60_000), submitter.clone());

        for n in 0..5 {
            batcher.enqueue(test_event(n));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = batcher.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.events_sent, 5);
        assert_eq!(stats.pending, 0);
        assert_eq!(submitter.delivered().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_on_timer() {
        let submitter = MockSubmitter::new(0);
        let batcher = DeliveryBatcher::new(&config(100, 200), submitter.clone());

        batcher.enqueue(test_event(0));
        batcher.enqueue(test_event(1));
        tokio::time::sleep(Duration::from_millis(250)).await;

        let stats = batcher.stats();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.events_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let submitter = MockSubmitter::new(2);
        let batcher = DeliveryBatcher::new(&config(1, 60_000), submitter.clone());

        batcher.enqueue(test_event(0));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(submitter.calls(), 3);
        let stats = batcher.stats();
        assert_eq!(stats.events_sent, 1);
        assert_eq!(stats.events_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_not_requeued() {
        let submitter = MockSubmitter::new(usize::MAX);
        let batcher = DeliveryBatcher::new(&config(1, 60_000), submitter.clone());

        batcher.enqueue(test_event(0));
        tokio::time::sleep(Duration::from_secs(5)).await;

        // Exactly retry_attempts submissions, then terminal
        assert_eq!(submitter.calls(), 3);
        let stats = batcher.stats();
        assert_eq!(stats.events_sent, 0);
        assert_eq!(stats.events_failed, 1);
        assert_eq!(stats.pending, 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(submitter.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_buffer() {
        let submitter = MockSubmitter::new(0);
        let mut batcher = DeliveryBatcher::new(&config(100, 60_000), submitter.clone());

        batcher.enqueue(test_event(0));
        batcher.enqueue(test_event(1));
        batcher.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = batcher.stats();
        assert_eq!(stats.flushes, 0);
        assert_eq!(stats.events_sent, 0);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_batch_size_flushes_immediately() {
        // Degraded config: zero threshold means every event flushes at once
        let submitter = MockSubmitter::new(0);
        let batcher = DeliveryBatcher::new(&config(0, 60_000), submitter.clone());

        batcher.enqueue(test_event(0));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(batcher.stats().flushes, 1);
        assert_eq!(batcher.stats().events_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_flush() {
        let submitter = MockSubmitter::new(0);
        let batcher = DeliveryBatcher::new(&config(100, 60_000), submitter.clone());

        batcher.enqueue(test_event(0));
        batcher.flush();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(batcher.stats().flushes, 1);
        assert_eq!(batcher.stats().events_sent, 1);
    }
}
