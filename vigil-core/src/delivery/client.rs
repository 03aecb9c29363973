//! HTTP client for the proctoring event ingestion API
//!
//! Implements both delivery collaborators over one reqwest client:
//! - [`SubmitEvent`] for the low-latency batcher (one event per call)
//! - [`SyncTransport`] for the offline queue (one call per eligible batch)
//!
//! Authentication tokens are pulled through a [`TokenProvider`] on every
//! request, so a refreshing accessor can be plugged in by the session layer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::config::DeliveryConfig;
use crate::error::{Error, Result};
use crate::offline::SyncTransport;
use crate::types::ProcessedEvent;

use super::batcher::SubmitEvent;

/// Access to the current API token.
///
/// The pipeline does not own authentication; it only consumes whatever token
/// the session layer currently holds.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// Fixed token, typically sourced from configuration.
pub struct StaticToken(pub Option<String>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Response from POST /sessions/{id}/events/sync
#[derive(Debug, Deserialize)]
struct SyncResponse {
    /// Number of events accepted
    accepted: usize,
    /// Number of events rejected (validation errors, closed session)
    #[serde(default)]
    rejected: usize,
}

/// Request body for POST /sessions/{id}/events/sync
#[derive(Serialize)]
struct SyncRequest<'a> {
    events: &'a [ProcessedEvent],
}

/// HTTP client for the event ingestion API
pub struct ApiClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Arc<dyn TokenProvider>,
}

impl ApiClient {
    /// Create a new client from configuration.
    ///
    /// Returns an error if no server URL is configured or the HTTP client
    /// cannot be built.
    pub fn new(config: &DeliveryConfig, token: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("delivery.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            token,
        })
    }

    /// Attach the current bearer token, if any.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Check if the ingestion server is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl SubmitEvent for ApiClient {
    /// Submit one event.
    ///
    /// Any transport error or non-2xx status maps to [`Error::Delivery`];
    /// callers treat every failure as retryable.
    async fn submit(&self, event: &ProcessedEvent) -> Result<()> {
        let url = format!(
            "{}/sessions/{}/events",
            self.base_url,
            urlencoding::encode(&event.session_id)
        );

        let response = self
            .authorize(self.http_client.post(&url))
            .json(event)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}

#[async_trait]
impl SyncTransport for ApiClient {
    /// Sync a batch of queued events.
    ///
    /// Returns `Ok(false)` when the server rejects part of the batch (an
    /// application-level "try again later"); transport failures reject.
    async fn sync(&self, events: &[ProcessedEvent]) -> Result<bool> {
        let Some(first) = events.first() else {
            return Ok(true);
        };

        let url = format!(
            "{}/sessions/{}/events/sync",
            self.base_url,
            urlencoding::encode(&first.session_id)
        );

        let response = self
            .authorize(self.http_client.post(&url))
            .json(&SyncRequest { events })
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let result: SyncResponse = response
                .json()
                .await
                .map_err(|e| Error::Delivery(format!("failed to parse response: {}", e)))?;

            tracing::debug!(
                accepted = result.accepted,
                rejected = result.rejected,
                "Synced queued events"
            );
            Ok(result.rejected == 0)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Delivery(format!(
                "API error ({}): {}",
                status, error_text
            )))
        }
    }
}
