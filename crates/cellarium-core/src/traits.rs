//! Repository traits for cellarium abstractions.
//!
//! These traits define the persistence interfaces the orchestration layer
//! depends on, enabling the PostgreSQL implementations in `cellarium-db` and
//! in-memory fakes in tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Repository for study file metadata.
#[async_trait]
pub trait StudyFileRepository: Send + Sync {
    /// Fetch a file by ID.
    async fn fetch(&self, id: Uuid) -> Result<StudyFile>;

    /// All other files in the same study, for concurrency gating.
    async fn siblings(&self, study_id: Uuid, exclude: Uuid) -> Result<Vec<StudyFile>>;

    /// Transition a file's parse status.
    async fn update_parse_status(&self, id: Uuid, status: ParseStatus) -> Result<()>;

    /// Increment and return the file's retry count.
    async fn increment_retry(&self, id: Uuid) -> Result<i32>;

    /// Mark a file permanently failed with a user-visible reason.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()>;
}

/// Repository for durable job records.
#[async_trait]
pub trait JobRecordRepository: Send + Sync {
    /// Persist a freshly submitted job record.
    async fn insert(&self, record: &JobRecord) -> Result<()>;

    /// Fetch by record ID.
    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>>;

    /// Fetch by backend job name.
    async fn get_by_name(&self, job_name: &str) -> Result<Option<JobRecord>>;

    /// Transition a job's status; sets `completed_at` on terminal states.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Atomically flip `analytics_reported` from false to true.
    ///
    /// Returns true exactly once per job; the completion-summary path uses
    /// this as its idempotence guard.
    async fn try_mark_analytics_reported(&self, id: Uuid) -> Result<bool>;

    /// All records not yet in a terminal state, for poll scheduling.
    async fn list_unfinished(&self) -> Result<Vec<JobRecord>>;
}

/// Repository for derived records written by ingest parses.
///
/// All mutations are scoped by compound study + file (+ cluster) filters so
/// concurrent retries on different files never contend.
#[async_trait]
pub trait DerivedDataRepository: Send + Sync {
    /// Genes ingested from one file.
    async fn gene_count(&self, study_id: Uuid, file_id: Uuid) -> Result<i64>;

    /// Cells ingested from one file.
    async fn cell_count(&self, study_id: Uuid, file_id: Uuid) -> Result<i64>;

    /// Remove all cell metadata rows tied to one file.
    async fn delete_cell_metadata(&self, study_id: Uuid, file_id: Uuid) -> Result<u64>;

    /// Remove genes and associated linear data tied to one file.
    async fn delete_genes(&self, study_id: Uuid, file_id: Uuid) -> Result<u64>;

    /// Remove one named cluster group and its linear data.
    async fn delete_cluster(
        &self,
        study_id: Uuid,
        file_id: Uuid,
        cluster_name: &str,
    ) -> Result<u64>;

    /// Remove every derived row across all fragment types for one file.
    async fn delete_all_fragments(&self, study_id: Uuid, file_id: Uuid) -> Result<u64>;

    /// Fragment kinds ("cluster", "metadata", "expression") extracted from an
    /// AnnData file, derived from persisted records rather than job output.
    async fn extracted_fragments(&self, study_id: Uuid, file_id: Uuid) -> Result<Vec<String>>;
}

/// Repository for cell annotations, consumed by DE eligibility.
#[async_trait]
pub trait AnnotationRepository: Send + Sync {
    /// Every annotation in a study, across cluster and study scope.
    async fn annotations_for_study(&self, study_id: Uuid) -> Result<Vec<Annotation>>;
}
