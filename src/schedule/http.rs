// Task scheduler reached over HTTP

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ScheduledExecution, SchedulerError, TaskScheduler, TrackingId};

/// Endpoint below the scheduler base URL that accepts playbook runs
const PLAYBOOK_ENDPOINT: &str = "actions/playbook";

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: TrackingId,
}

/// Posts runs as JSON to the scheduler's HTTP API
#[derive(Debug, Clone)]
pub struct HttpTaskScheduler {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTaskScheduler {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SchedulerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(HttpTaskScheduler {
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), PLAYBOOK_ENDPOINT),
            client,
        })
    }

    /// Use a preconfigured client (proxies, TLS roots)
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TaskScheduler for HttpTaskScheduler {
    async fn submit(&self, execution: &ScheduledExecution) -> Result<TrackingId, SchedulerError> {
        debug!(endpoint = %self.endpoint, "submitting playbook run");

        // Transport errors and timeouts both mean nobody accepted the run
        let response = self
            .client
            .post(&self.endpoint)
            .json(execution)
            .send()
            .await
            .map_err(|e| SchedulerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SchedulerError::Unavailable(format!(
                "scheduler returned status {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulerError::Rejected(format!(
                "scheduler returned status {}: {}",
                status,
                body.trim()
            )));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| SchedulerError::Rejected(format!("invalid scheduler response: {}", e)))?;

        Ok(submitted.id)
    }
}
