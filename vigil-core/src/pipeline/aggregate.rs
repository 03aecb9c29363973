//! Per-type event aggregation
//!
//! Folds a collection of processed events into per-type rollups for scoring
//! and reporting consumers. Aggregations are always derived on demand and
//! never persisted.

use std::collections::HashMap;

use crate::types::{Aggregation, EventType, ProcessedEvent};

/// Fold events into per-type rollups.
///
/// Events flagged `is_duplicate` are skipped. The fold runs left-to-right in
/// input order (callers typically pass timestamp-ascending collections); the
/// running weighted confidence mean depends on that order, so callers must
/// preserve it. Missing durations count as 0. Empty input yields an empty
/// map; this operation cannot fail.
pub fn aggregate_events(events: &[ProcessedEvent]) -> HashMap<EventType, Aggregation> {
    let mut rollups: HashMap<EventType, Aggregation> = HashMap::new();

    for event in events.iter().filter(|e| !e.is_duplicate) {
        let agg = rollups
            .entry(event.event_type.clone())
            .or_insert_with(|| Aggregation {
                event_type: event.event_type.clone(),
                count: 0,
                total_duration_ms: 0,
                average_confidence: 0.0,
                first_occurrence: event.timestamp,
                last_occurrence: event.timestamp,
                events: Vec::new(),
            });

        agg.count += 1;
        agg.total_duration_ms += event.duration_ms.unwrap_or(0);

        // Online weighted mean: avg' = (avg*(n-1) + conf) / n
        let n = agg.count as f64;
        agg.average_confidence = (agg.average_confidence * (n - 1.0) + event.confidence) / n;

        agg.first_occurrence = agg.first_occurrence.min(event.timestamp);
        agg.last_occurrence = agg.last_occurrence.max(event.timestamp);
        agg.events.push(event.clone());
    }

    rollups
}
