//! Event normalization and id derivation
//!
//! Converts a raw detection signal into the canonical [`ProcessedEvent`]
//! record. Normalization is a pure transformation and never fails: missing
//! optional fields get defaults (no duration, empty metadata map).
//!
//! The derived `id` is a pure function of `(session_id, event_type,
//! timestamp)` so that two raw events with the same logical identity always
//! yield the same canonical id, making replays idempotent upstream.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::types::{EventType, ProcessedEvent, RawEvent};

/// Normalize a raw detection signal into a canonical event.
///
/// Side-effect free: does not decide duplication, does not touch the network.
/// The metadata map is enriched with `processed_at` and a `raw` backreference
/// to the original signal.
pub fn normalize(raw: &RawEvent) -> ProcessedEvent {
    let processed_at = Utc::now();

    // Non-object metadata is coerced to an empty map rather than rejected
    let mut metadata = match &raw.metadata {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        _ => serde_json::json!({}),
    };
    metadata["processed_at"] = serde_json::json!(processed_at.to_rfc3339());
    metadata["raw"] = serde_json::to_value(raw).unwrap_or(serde_json::Value::Null);

    ProcessedEvent {
        id: derive_event_id(&raw.session_id, &raw.event_type, &raw.timestamp),
        session_id: raw.session_id.clone(),
        candidate_id: raw.candidate_id.clone(),
        event_type: raw.event_type.clone(),
        timestamp: raw.timestamp,
        duration_ms: raw.duration_ms,
        confidence: raw.confidence,
        metadata,
        is_processed: true,
        is_duplicate: false,
        processed_at,
    }
}

/// Derive the stable event id for a `(session, type, timestamp)` triple.
///
/// Returns a 32-character hex digest: the first 16 bytes of
/// SHA-256(`session:type:rfc3339-timestamp`).
pub fn derive_event_id(
    session_id: &str,
    event_type: &EventType,
    timestamp: &DateTime<Utc>,
) -> String {
    let hash_input = format!(
        "{}:{}:{}",
        session_id,
        event_type.as_str(),
        timestamp.to_rfc3339()
    );

    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let result = hasher.finalize();

    // Take first 16 bytes (32 hex chars)
    hex::encode(&result[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_raw(ts_secs: i64) -> RawEvent {
        RawEvent {
            session_id: "exam-42".to_string(),
            candidate_id: "cand-7".to_string(),
            event_type: EventType::FocusLoss,
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            duration_ms: Some(1200),
            confidence: 0.82,
            metadata: serde_json::json!({"camera": "front"}),
        }
    }

    #[test]
    fn test_id_is_deterministic() {
        let raw = make_raw(1_700_000_000);
        let a = normalize(&raw);
        let b = normalize(&raw);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn test_id_varies_with_triple() {
        let base = make_raw(1_700_000_000);

        let mut other_session = base.clone();
        other_session.session_id = "exam-43".to_string();

        let mut other_type = base.clone();
        other_type.event_type = EventType::Absence;

        let mut other_ts = base.clone();
        other_ts.timestamp = Utc.timestamp_opt(1_700_000_001, 0).unwrap();

        let id = normalize(&base).id;
        assert_ne!(id, normalize(&other_session).id);
        assert_ne!(id, normalize(&other_type).id);
        assert_ne!(id, normalize(&other_ts).id);
    }

    #[test]
    fn test_id_ignores_confidence_and_metadata() {
        let base = make_raw(1_700_000_000);
        let mut tweaked = base.clone();
        tweaked.confidence = 0.4;
        tweaked.metadata = serde_json::json!({"camera": "rear"});
        tweaked.duration_ms = None;

        assert_eq!(normalize(&base).id, normalize(&tweaked).id);
    }

    #[test]
    fn test_metadata_enrichment() {
        let raw = make_raw(1_700_000_000);
        let event = normalize(&raw);

        assert_eq!(event.metadata["camera"], "front");
        assert!(event.metadata["processed_at"].is_string());
        assert_eq!(event.metadata["raw"]["session_id"], "exam-42");
        assert!(event.is_processed);
        assert!(!event.is_duplicate);
    }

    #[test]
    fn test_non_object_metadata_defaults_to_empty_map() {
        let mut raw = make_raw(1_700_000_000);
        raw.metadata = serde_json::Value::Null;

        let event = normalize(&raw);
        assert!(event.metadata.is_object());
        assert!(event.metadata["processed_at"].is_string());
    }
}
