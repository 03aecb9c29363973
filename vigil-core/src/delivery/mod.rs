//! Low-latency delivery path
//!
//! The delivery batcher buffers accepted events and flushes them to the
//! network collaborator on a size threshold or a periodic timer, retrying
//! each event independently with linear backoff. Exhausted events are not
//! re-queued here: the offline durable queue is the durability backstop.

mod batcher;
mod client;

pub use batcher::{BatcherStats, DeliveryBatcher, SubmitEvent};
pub use client::{ApiClient, StaticToken, TokenProvider};
