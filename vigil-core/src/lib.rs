//! vigil-core: detection event pipeline for remote proctoring sessions
//!
//! Takes raw detection events from sensing processes (focus loss, absence,
//! multiple faces, ...) and turns them into deduplicated, aggregated,
//! durably-delivered session evidence:
//!
//! - **pipeline**: normalization, streaming/batch deduplication, per-type
//!   aggregation, and the orchestrating [`EventPipeline`]
//! - **delivery**: low-latency batcher with per-event linear-backoff retry,
//!   plus the HTTP client for the ingestion API
//! - **offline**: durable queue persisted across restarts, synced on a timer
//!   and on connectivity transitions
//! - **config** / **logging** / **error**: ambient plumbing shared by the
//!   library and the CLI

pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod offline;
pub mod pipeline;
pub mod types;

pub use config::Config;
pub use delivery::{ApiClient, BatcherStats, DeliveryBatcher, StaticToken, SubmitEvent, TokenProvider};
pub use error::{Error, Result};
pub use offline::{BlobStore, MemoryStore, OfflineQueue, SqliteStore, SyncTransport};
pub use pipeline::EventPipeline;
pub use types::{
    Aggregation, EventType, ProcessedEvent, QueueStatus, QueuedEvent, RawEvent,
};
