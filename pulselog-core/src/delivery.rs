//! Delivery of event batches to the remote collector
//!
//! The sync coordinator only sees the [`DeliveryClient`] trait. A batch is
//! atomic from its point of view: either the whole batch is delivered or
//! the call fails with a classified [`DeliveryError`].
//!
//! [`HttpDeliveryClient`] posts batches as JSON to
//! `{server_url}/analytics/action-log/v1/batch-write/`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::config::CollectorConfig;
use crate::device::DeviceIdProvider;
use crate::error::{DeliveryError, Error, Result};
use crate::types::{EnrichedEvent, EventBatchRequest};

/// Path of the batch-write endpoint, relative to the collector base URL
pub const BATCH_WRITE_PATH: &str = "analytics/action-log/v1/batch-write/";

/// Header carrying the stable device id
pub const CLIENT_ID_HEADER: &str = "Client-Id";

/// Sends one batch of enriched events to the collector
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send_batch(&self, events: &[EnrichedEvent]) -> std::result::Result<(), DeliveryError>;
}

/// HTTP client for the collector batch-write API
pub struct HttpDeliveryClient {
    http_client: reqwest::Client,
    base_url: String,
    device: Arc<dyn DeviceIdProvider>,
}

impl HttpDeliveryClient {
    /// Create a new delivery client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &CollectorConfig, device: Arc<dyn DeviceIdProvider>) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("collector.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &config.api_key {
            let auth_value = format!("Bearer {}", api_key);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            device,
        })
    }

    /// Full URL of the batch-write endpoint
    pub fn batch_url(&self) -> String {
        format!("{}/{}", self.base_url, BATCH_WRITE_PATH)
    }

    /// Check if the collector can be reached
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::debug!(error = %e, "Collector health check failed");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn send_batch(&self, events: &[EnrichedEvent]) -> std::result::Result<(), DeliveryError> {
        let response = self
            .http_client
            .post(self.batch_url())
            .header(CLIENT_ID_HEADER, self.device.device_id())
            .json(&EventBatchRequest { events })
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        Err(classify_status(status, error_text))
    }
}

/// Map a failure to send at all
///
/// A request that could not be built fails identically on every attempt, so
/// only transport failures are treated as transient.
fn classify_request_error(e: reqwest::Error) -> DeliveryError {
    if e.is_builder() {
        DeliveryError::InvalidRequest(e.to_string())
    } else {
        DeliveryError::Transient(format!("HTTP request failed: {}", e))
    }
}

/// Map a non-success HTTP status to a delivery error
///
/// 5xx, 408 and 429 are worth retrying; any other status means the collector
/// refused this batch and will keep refusing it.
fn classify_status(status: StatusCode, body: String) -> DeliveryError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        DeliveryError::Transient(format!("API error ({}): {}", status, body))
    } else {
        DeliveryError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}
