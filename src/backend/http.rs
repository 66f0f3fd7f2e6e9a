//! HTTP execution backend

use super::types::{reply_from_value, ExecutionRequest};
use super::{BackendError, ExecutionBackend};
use crate::db::Workflow;
use crate::session::Turn;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Backend reached over HTTP: `POST {base_url}/v1/workflows/run`
pub struct HttpBackend {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, BackendError> {
        // The router enforces the per-turn deadline; this only stops a hung
        // connection from outliving it by much.
        let client = Client::builder()
            .timeout(timeout + Duration::from_secs(5))
            .build()
            .map_err(|e| BackendError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/v1/workflows/run", base_url.trim_end_matches('/')),
        })
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> BackendError {
        match status.as_u16() {
            401 | 403 => BackendError::auth(format!("Authentication failed: {body}")),
            500..=599 => BackendError::server_error(format!("Server error: {body}")),
            _ => BackendError::rejected(format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl ExecutionBackend for HttpBackend {
    async fn execute(
        &self,
        workflow: &Workflow,
        history: &[Turn],
        new_turn: &str,
    ) -> Result<String, BackendError> {
        let request = ExecutionRequest::new(workflow, history, new_turn);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    BackendError::network(format!("Connection failed: {e}"))
                } else {
                    BackendError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::malformed(format!("Failed to parse response: {e}")))?;

        reply_from_value(value)
    }

    fn name(&self) -> &str {
        &self.endpoint
    }
}
