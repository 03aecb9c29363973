//! Event deduplication
//!
//! Independent sensing processes frequently report the same concern several
//! times in quick succession. An event is considered a repeat of a prior
//! same-type event when both fall inside the deduplication window and their
//! confidences differ by no more than the similarity threshold.
//!
//! Two modes share those constants but differ in shape:
//! - **Streaming** ([`Deduplicator`]): classifies one event at a time against
//!   the trailing window of already-accepted events. Never retroactively
//!   mutates earlier events.
//! - **Batch** ([`deduplicate_events`]): reprocesses a closed collection,
//!   sorting by timestamp and bucketing by `(type, floor(ts/window),
//!   session)`. Sets `is_duplicate` on excluded members.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::types::{EventType, ProcessedEvent};

/// Trailing window within which same-type events are candidates for folding
pub const DEDUP_WINDOW_MS: i64 = 5000;

/// Maximum confidence delta for two events to count as the same observation
pub const CONFIDENCE_SIMILARITY: f64 = 0.1;

/// Compact record of an accepted event, kept for the trailing window
#[derive(Debug, Clone)]
struct RecentEvent {
    event_type: EventType,
    timestamp: DateTime<Utc>,
    confidence: f64,
}

/// Streaming deduplicator for the live processing path.
///
/// Tracks accepted (non-duplicate) events and classifies each incoming event
/// against them. Comparison spans all prior accepted events regardless of
/// session: the in-memory path runs one pipeline instance per session.
#[derive(Debug, Default)]
pub struct Deduplicator {
    recent: VecDeque<RecentEvent>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify an event; returns true if it repeats a recent accepted event.
    ///
    /// Accepted events are recorded for future comparisons; duplicates are
    /// not (a duplicate never extends the window).
    pub fn check(&mut self, event: &ProcessedEvent) -> bool {
        self.prune(event.timestamp);

        let duplicate = self.recent.iter().any(|prior| {
            prior.event_type == event.event_type
                && (event.timestamp - prior.timestamp)
                    .num_milliseconds()
                    .abs()
                    <= DEDUP_WINDOW_MS
                && (prior.confidence - event.confidence).abs() <= CONFIDENCE_SIMILARITY
        });

        if !duplicate {
            self.recent.push_back(RecentEvent {
                event_type: event.event_type.clone(),
                timestamp: event.timestamp,
                confidence: event.confidence,
            });
        }

        duplicate
    }

    /// Drop accepted events that can no longer match anything
    fn prune(&mut self, now: DateTime<Utc>) {
        let horizon = now - Duration::milliseconds(DEDUP_WINDOW_MS);
        while let Some(front) = self.recent.front() {
            if front.timestamp < horizon {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of accepted events currently tracked
    pub fn tracked(&self) -> usize {
        self.recent.len()
    }
}

/// Batch-mode deduplication over a closed collection.
///
/// Sorts by timestamp, then buckets events by
/// `(event_type, floor(timestamp / window), session_id)`. Within a bucket, an
/// event is a duplicate of the last accepted one unless their time delta
/// exceeds the window or their confidence delta exceeds the threshold, in
/// which case the later event starts a new window.
///
/// Returns the full collection, timestamp-sorted, with `is_duplicate` set on
/// excluded members. Consumers (the aggregator, delivery paths) skip flagged
/// entries.
pub fn deduplicate_events(mut events: Vec<ProcessedEvent>) -> Vec<ProcessedEvent> {
    events.sort_by_key(|e| e.timestamp);

    // Last accepted (timestamp, confidence) per window key
    let mut accepted: HashMap<(EventType, i64, String), (DateTime<Utc>, f64)> = HashMap::new();

    for event in events.iter_mut() {
        let bucket = event.timestamp.timestamp_millis().div_euclid(DEDUP_WINDOW_MS);
        let key = (event.event_type.clone(), bucket, event.session_id.clone());

        match accepted.get(&key) {
            Some((ts, confidence))
                if (event.timestamp - *ts).num_milliseconds() <= DEDUP_WINDOW_MS
                    && (confidence - event.confidence).abs() <= CONFIDENCE_SIMILARITY =>
            {
                event.is_duplicate = true;
            }
            _ => {
                event.is_duplicate = false;
                accepted.insert(key, (event.timestamp, event.confidence));
            }
        }
    }

    events
}
