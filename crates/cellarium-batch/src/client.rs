//! HTTP client for the cloud batch execution API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument};

use cellarium_core::{defaults, Error, OrchestratorConfig, Result};

use crate::backend::ComputeBackend;
use crate::types::{ApiErrorBody, BatchJob, BatchJobRequest, ListJobsResponse, Task};

/// Batch API client.
///
/// One instance per process; cheap to clone via the inner reqwest client.
#[derive(Clone)]
pub struct BatchClient {
    client: Client,
    base_url: String,
    project: String,
    location: String,
    auth_token: String,
}

impl BatchClient {
    /// Create a client from orchestrator configuration.
    pub fn new(config: &OrchestratorConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::BATCH_REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        info!(
            base_url = %config.batch_api_base,
            project = %config.project,
            location = %config.location,
            "Initializing batch client"
        );

        Self {
            client,
            base_url: config.batch_api_base.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            location: config.location.clone(),
            auth_token: config.auth_token.clone(),
        }
    }

    /// Fully qualified resource name for a short job ID.
    pub fn job_resource_name(&self, job_id: &str) -> String {
        format!(
            "projects/{}/locations/{}/jobs/{}",
            self.project, self.location, job_id
        )
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/projects/{}/locations/{}/jobs",
            self.base_url, self.project, self.location
        )
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.jobs_url(), job_id)
    }

    /// Normalize a non-success response into the surfaced error string.
    ///
    /// Structured JSON bodies become `"message (code): status"`; anything
    /// else keeps the HTTP status and raw body.
    async fn error_from_response(resp: reqwest::Response) -> Error {
        let http_status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Error::Batch(normalize_error_body(http_status.as_u16(), &body))
    }

    async fn check<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        if resp.status().is_success() {
            Ok(resp.json::<T>().await?)
        } else {
            Err(Self::error_from_response(resp).await)
        }
    }
}

/// Render a backend error body as a single human-readable line.
pub fn normalize_error_body(http_status: u16, body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => format!(
            "{} ({}): {}",
            parsed.error.message, parsed.error.code, parsed.error.status
        ),
        Err(_) => format!("HTTP {}: {}", http_status, body.trim()),
    }
}

#[async_trait]
impl ComputeBackend for BatchClient {
    #[instrument(skip(self, request), fields(job_id = %job_id))]
    async fn create_job(
        &self,
        job_id: &str,
        request: BatchJobRequest,
        quota_user: &str,
    ) -> Result<BatchJob> {
        debug!(url = %self.jobs_url(), "Submitting batch job");
        let resp = self
            .client
            .post(self.jobs_url())
            .bearer_auth(&self.auth_token)
            .query(&[("job_id", job_id), ("quotaUser", quota_user)])
            .json(&request)
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn get_job(&self, job_id: &str) -> Result<BatchJob> {
        let resp = self
            .client
            .get(self.job_url(job_id))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn list_jobs(&self, filter: Option<&str>) -> Result<Vec<BatchJob>> {
        let mut req = self
            .client
            .get(self.jobs_url())
            .bearer_auth(&self.auth_token);
        if let Some(filter) = filter {
            req = req.query(&[("filter", filter)]);
        }
        let resp = req.send().await?;
        let page: ListJobsResponse = Self::check(resp).await?;
        Ok(page.jobs)
    }

    async fn get_task(&self, job_id: &str) -> Result<Task> {
        let url = format!("{}/taskGroups/group0/tasks/0", self.job_url(job_id));
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        Self::check(resp).await
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.job_url(job_id))
            .bearer_auth(&self.auth_token)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(resp).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_structured_error_body() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded for batch jobs", "status": "RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(
            normalize_error_body(429, body),
            "Quota exceeded for batch jobs (429): RESOURCE_EXHAUSTED"
        );
    }

    #[test]
    fn test_normalize_plain_error_body() {
        assert_eq!(
            normalize_error_body(502, "Bad Gateway\n"),
            "HTTP 502: Bad Gateway"
        );
    }

    #[test]
    fn test_normalize_malformed_json_falls_back() {
        let body = r#"{"not_error": true}"#;
        assert!(normalize_error_body(500, body).starts_with("HTTP 500:"));
    }

    #[test]
    fn test_job_resource_name() {
        let config = OrchestratorConfig {
            project: "scp-prod".to_string(),
            location: "us-central1".to_string(),
            ..OrchestratorConfig::default()
        };
        let client = BatchClient::new(&config);
        assert_eq!(
            client.job_resource_name("ingest-abc"),
            "projects/scp-prod/locations/us-central1/jobs/ingest-abc"
        );
    }
}
