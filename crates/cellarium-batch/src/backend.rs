//! Compute backend abstraction.

use async_trait::async_trait;

use cellarium_core::Result;

use crate::types::{BatchJob, BatchJobRequest, Task};

/// Thin adapter over a cloud batch-execution API.
///
/// Implemented by [`crate::client::BatchClient`] for the real backend and
/// [`crate::mock::MockComputeBackend`] for tests. All status is re-derived
/// fresh from each call; nothing is cached or mutated locally.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Create a job under the given short ID. Exactly one backend job is
    /// created per call; `quota_user` segregates API quota per requester.
    async fn create_job(
        &self,
        job_id: &str,
        request: BatchJobRequest,
        quota_user: &str,
    ) -> Result<BatchJob>;

    /// Fetch a job by short ID.
    async fn get_job(&self, job_id: &str) -> Result<BatchJob>;

    /// List jobs, optionally filtered by a backend filter expression.
    async fn list_jobs(&self, filter: Option<&str>) -> Result<Vec<BatchJob>>;

    /// Fetch the first task of a job's first task group.
    async fn get_task(&self, job_id: &str) -> Result<Task>;

    /// Request deletion of a job (explicit abort).
    async fn delete_job(&self, job_id: &str) -> Result<()>;
}
