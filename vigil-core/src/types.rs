//! Core domain types for vigil
//!
//! These types represent the canonical data model for detection events
//! flowing through the pipeline.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **RawEvent** | A detection signal as emitted by a sensing process (caller-owned) |
//! | **ProcessedEvent** | The canonical, id-bearing record owned by the pipeline |
//! | **QueuedEvent** | A processed event wrapped with offline-queue retry state |
//! | **Aggregation** | A per-event-type rollup, recomputed on demand, never persisted |
//!
//! A `ProcessedEvent` is created exactly once per `RawEvent` and is never
//! mutated afterwards, with one exception: batch deduplication may set
//! `is_duplicate` retroactively when reprocessing a historical collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Event types
// ============================================

/// Kind of integrity concern reported by a sensing process.
///
/// This is an open enum: event producers may emit types the pipeline has
/// never seen, which round-trip losslessly through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Candidate looked away from the exam surface
    FocusLoss,
    /// No face visible in the camera frame
    Absence,
    /// More than one face visible
    MultipleFaces,
    /// Prohibited object recognized (notes, book, ...)
    UnauthorizedItem,
    /// Gaze direction off-screen beyond tolerance
    GazeAway,
    /// Secondary device (phone, tablet) recognized
    DeviceDetected,
    /// Any type this build does not know about
    Other(String),
}

impl EventType {
    /// Returns the wire identifier for this event type
    pub fn as_str(&self) -> &str {
        match self {
            EventType::FocusLoss => "focus-loss",
            EventType::Absence => "absence",
            EventType::MultipleFaces => "multiple-faces",
            EventType::UnauthorizedItem => "unauthorized-item",
            EventType::GazeAway => "gaze-away",
            EventType::DeviceDetected => "device-detected",
            EventType::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "focus-loss" => EventType::FocusLoss,
            "absence" => EventType::Absence,
            "multiple-faces" => EventType::MultipleFaces,
            "unauthorized-item" => EventType::UnauthorizedItem,
            "gaze-away" => EventType::GazeAway,
            "device-detected" => EventType::DeviceDetected,
            _ => EventType::Other(s),
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================
// Raw and processed events
// ============================================

/// A detection signal exactly as produced by a sensing process.
///
/// Immutable once created; owned by the caller until handed to the
/// pipeline's normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Monitored session this event belongs to
    pub session_id: String,
    /// Candidate being monitored
    pub candidate_id: String,
    /// Kind of concern detected
    pub event_type: EventType,
    /// When the sensing process observed the concern
    pub timestamp: DateTime<Utc>,
    /// Observed duration in milliseconds, if the detector measures one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Detector confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Free-form detector metadata (open key/value map)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The canonical event record owned by the pipeline.
///
/// Carries all raw fields plus a deterministic `id`: the same
/// `(session_id, event_type, timestamp)` triple always derives the same id,
/// so replays are idempotent upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Stable identifier derived from (session, type, timestamp)
    pub id: String,
    /// Monitored session this event belongs to
    pub session_id: String,
    /// Candidate being monitored
    pub candidate_id: String,
    /// Kind of concern detected
    pub event_type: EventType,
    /// When the sensing process observed the concern
    pub timestamp: DateTime<Utc>,
    /// Observed duration in milliseconds, if measured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// Detector confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Detector metadata enriched with `processed_at` and a `raw` backreference
    pub metadata: serde_json::Value,
    /// True once the event has passed through the pipeline
    pub is_processed: bool,
    /// True if classified as a repeat of a very recent same-type event
    pub is_duplicate: bool,
    /// When the pipeline normalized this event
    pub processed_at: DateTime<Utc>,
}

// ============================================
// Offline queue entries
// ============================================

/// An offline-queue entry: a processed event plus retry bookkeeping.
///
/// Created on enqueue; `retry_count` and `last_attempt` are bumped in place
/// on every failed sync attempt; removed on confirmed sync or eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedEvent {
    /// The event awaiting durable delivery
    pub event: ProcessedEvent,
    /// When the entry was enqueued
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed sync attempts so far
    pub retry_count: u32,
    /// When the last sync attempt covering this entry happened
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl QueuedEvent {
    /// Wrap a processed event for the offline queue
    pub fn new(event: ProcessedEvent) -> Self {
        Self {
            event,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_attempt: None,
        }
    }

    /// Whether this entry has exhausted its retry budget
    pub fn is_exhausted(&self, retry_attempts: u32) -> bool {
        self.retry_count >= retry_attempts
    }
}

// ============================================
// Derived reporting types
// ============================================

/// Per-event-type rollup over a collection of processed events.
///
/// Ephemeral: always recomputed on demand, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregation {
    /// Event type this rollup covers
    pub event_type: EventType,
    /// Number of non-duplicate events folded in
    pub count: usize,
    /// Sum of observed durations (missing duration counts as 0)
    pub total_duration_ms: i64,
    /// Running weighted mean of confidence, in fold order
    pub average_confidence: f64,
    /// Earliest timestamp seen for this type
    pub first_occurrence: DateTime<Utc>,
    /// Latest timestamp seen for this type
    pub last_occurrence: DateTime<Utc>,
    /// The member events, in fold order
    pub events: Vec<ProcessedEvent>,
}

/// Live snapshot of the offline queue, computed on request.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// All entries currently in the queue
    pub total: usize,
    /// Entries still eligible for retry
    pub pending: usize,
    /// Entries that exhausted their retry budget (terminal until cleared)
    pub failed: usize,
    /// Enqueue time of the oldest entry
    pub oldest: Option<DateTime<Utc>>,
    /// Enqueue time of the newest entry
    pub newest: Option<DateTime<Utc>>,
}
