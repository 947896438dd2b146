use std::time::Duration;

use async_trait::async_trait;
use collections::CollectionSet;
use reqwest::Client;
use serde_json::Value;

use crate::error::PollError;

pub const SYNC_PATH: &str = "/sync";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a poller gets its payloads from.
#[async_trait]
pub trait SyncSource: Send + Sync {
    async fn fetch(&self, collections: &CollectionSet) -> Result<Value, PollError>;
}

pub struct HttpSource {
    client: Client,
    endpoint: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self, PollError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, PollError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{SYNC_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SyncSource for HttpSource {
    async fn fetch(&self, collections: &CollectionSet) -> Result<Value, PollError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("collections", collections.to_query())])
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<Value>(&bytes)
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("API Error").to_string());

            return Err(PollError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value =
            serde_json::from_slice(&bytes).map_err(|e| PollError::Malformed(e.to_string()))?;

        if !body.is_object() {
            return Err(PollError::Malformed("expected a JSON object".to_string()));
        }

        Ok(body)
    }
}
