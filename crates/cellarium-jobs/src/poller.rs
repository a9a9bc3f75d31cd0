//! Job status polling and completion handling.
//!
//! The poller re-derives everything from the backend's job status on each
//! call; nothing is cached. Completion reports at most once per job: the
//! repository-level `analytics_reported` CAS is the idempotence guard, taken
//! only after every fallible read has succeeded, so a second poller observing
//! the same terminal state does nothing and a transient repository error
//! never consumes the report.

use std::sync::Arc;

use tracing::{info, warn};

use cellarium_batch::{BatchJob, ComputeBackend, JobState, Task};
use cellarium_core::{
    AnnotationRepository, DerivedDataRepository, IngestAction, JobAnalytics, JobRecord,
    JobRecordRepository, JobStatus, Result, StudyFile, StudyFileRepository,
};

use crate::de;

/// True once the backend reports a terminal state.
pub fn job_done(job: &BatchJob) -> bool {
    job.state().is_terminal()
}

/// Container exit code from a task's status history.
///
/// `None` for succeeded tasks. For failures, prefers the structured
/// `taskExecution` block of the last failed event and falls back to parsing
/// "exited with code N" from the description.
pub fn exit_code_from_task(task: &Task) -> Option<i32> {
    if task.status.state == JobState::Succeeded {
        return None;
    }
    let last_failed = task
        .status
        .status_events
        .iter()
        .rev()
        .find(|e| e.task_state.as_deref() == Some("FAILED"))?;

    if let Some(execution) = &last_failed.task_execution {
        return Some(execution.exit_code);
    }
    parse_exit_code(&last_failed.description)
}

fn parse_exit_code(description: &str) -> Option<i32> {
    let idx = description.rfind("code ")?;
    description[idx + 5..]
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

/// Map a terminal backend state onto the persisted job status.
pub fn terminal_status(job: &BatchJob) -> JobStatus {
    match job.state() {
        JobState::Succeeded => JobStatus::Succeeded,
        JobState::Failed => JobStatus::Failed,
        JobState::DeletionInProgress => JobStatus::Aborted,
        _ => JobStatus::Running,
    }
}

/// What the worker should do after handling a terminal job.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// Another poller already reported this job; nothing left to do.
    AlreadyReported,
    /// Success: analytics emitted, listed DE launches pending.
    Succeeded {
        analytics: JobAnalytics,
        de_annotations: Vec<cellarium_core::Annotation>,
    },
    /// Failure: analytics emitted, file handed to the retry coordinator.
    Failed { analytics: JobAnalytics },
}

/// Terminal-state processing for polled jobs.
pub struct CompletionHandler {
    backend: Arc<dyn ComputeBackend>,
    job_records: Arc<dyn JobRecordRepository>,
    study_files: Arc<dyn StudyFileRepository>,
    derived: Arc<dyn DerivedDataRepository>,
    annotations: Arc<dyn AnnotationRepository>,
}

impl CompletionHandler {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        job_records: Arc<dyn JobRecordRepository>,
        study_files: Arc<dyn StudyFileRepository>,
        derived: Arc<dyn DerivedDataRepository>,
        annotations: Arc<dyn AnnotationRepository>,
    ) -> Self {
        Self {
            backend,
            job_records,
            study_files,
            derived,
            annotations,
        }
    }

    /// Handle one terminal job: compute analytics and the DE plan, persist the
    /// status transition, and emit the report at most once.
    ///
    /// Every fallible read runs before any state flips, so a transient
    /// repository error leaves the record untouched and unreported; the next
    /// poll runs completion again from the top.
    pub async fn handle_completion(
        &self,
        record: &JobRecord,
        job: &BatchJob,
    ) -> Result<CompletionOutcome> {
        let status = terminal_status(job);
        let error = job.error_description().map(String::from);

        let file = self.study_files.fetch(record.study_file_id).await?;
        let exit_code = match self.backend.get_task(job_short_id(&record.job_name)).await {
            Ok(task) => exit_code_from_task(&task),
            // Task lookup can 404 after backend cleanup; analytics proceed
            // without an exit code.
            Err(e) => {
                warn!(job_name = %record.job_name, error = %e, "Task lookup failed");
                None
            }
        };
        let analytics = self
            .get_job_analytics(record, &file, job, exit_code, error.as_deref())
            .await?;
        let de_annotations = if status == JobStatus::Succeeded {
            self.plan_de_launches(record, &file).await?
        } else {
            Vec::new()
        };

        self.job_records
            .update_status(record.id, status, error.as_deref())
            .await?;

        // At most one poller wins the flip; the rest bail out here.
        if !self
            .job_records
            .try_mark_analytics_reported(record.id)
            .await?
        {
            return Ok(CompletionOutcome::AlreadyReported);
        }

        emit_analytics(&analytics);

        if status == JobStatus::Succeeded {
            Ok(CompletionOutcome::Succeeded {
                analytics,
                de_annotations,
            })
        } else {
            Ok(CompletionOutcome::Failed { analytics })
        }
    }

    /// Flat analytics projection for one completed job.
    pub async fn get_job_analytics(
        &self,
        record: &JobRecord,
        file: &StudyFile,
        job: &BatchJob,
        exit_code: Option<i32>,
        error: Option<&str>,
    ) -> Result<JobAnalytics> {
        let events = &job.status.status_events;
        let perf_time = match (events.first(), events.last()) {
            (Some(first), Some(last)) => {
                (last.event_time - first.event_time).num_milliseconds()
            }
            _ => 0,
        };

        let succeeded = error.is_none() && job.state() == JobState::Succeeded;

        let (num_genes, num_cells) = if succeeded && writes_expression_records(record.action) {
            (
                Some(
                    self.derived
                        .gene_count(record.study_id, record.study_file_id)
                        .await?,
                ),
                Some(
                    self.derived
                        .cell_count(record.study_id, record.study_file_id)
                        .await?,
                ),
            )
        } else {
            (None, None)
        };

        let (extracted_fragments, is_reference_anndata) =
            if record.action == IngestAction::IngestAnnData {
                let fragments = if succeeded && !file.is_reference_anndata {
                    Some(
                        self.derived
                            .extracted_fragments(record.study_id, record.study_file_id)
                            .await?,
                    )
                } else {
                    Some(Vec::new())
                };
                (fragments, Some(file.is_reference_anndata))
            } else {
                (None, None)
            };

        Ok(JobAnalytics {
            perf_time,
            file_name: file.name.clone(),
            file_type: file.file_type.as_str().to_string(),
            file_size: file.upload_file_size,
            action: record.action.as_str().to_string(),
            trigger: Some(if file.retry_count > 0 {
                "retry".to_string()
            } else {
                "upload".to_string()
            }),
            machine_type: job
                .allocation_policy
                .as_ref()
                .and_then(|p| p.machine_type())
                .map(String::from)
                .or_else(|| Some(record.machine_type.clone())),
            boot_disk_size_gb: job
                .allocation_policy
                .as_ref()
                .and_then(|p| p.boot_disk_size_gb()),
            exit_code,
            job_status: if succeeded { "success" } else { "failed" }.to_string(),
            error: error.map(String::from),
            num_genes,
            num_cells,
            extracted_fragments,
            is_reference_anndata,
        })
    }

    /// Eligible annotations for follow-up DE launches after a successful
    /// expression-bearing ingest.
    async fn plan_de_launches(
        &self,
        record: &JobRecord,
        file: &StudyFile,
    ) -> Result<Vec<cellarium_core::Annotation>> {
        if !writes_expression_records(record.action) || file.is_reference_anndata {
            return Ok(Vec::new());
        }
        let annotations = self.annotations.annotations_for_study(record.study_id).await?;
        let cells = self
            .derived
            .cell_count(record.study_id, record.study_file_id)
            .await?;
        Ok(de::eligible_annotations(&annotations, cells))
    }
}

/// Actions whose success leaves queryable expression records behind.
fn writes_expression_records(action: IngestAction) -> bool {
    matches!(
        action,
        IngestAction::IngestExpression | IngestAction::IngestAnnData
    )
}

/// Short backend job ID, the last segment of the resource name.
pub fn job_short_id(job_name: &str) -> &str {
    job_name.rsplit('/').next().unwrap_or(job_name)
}

/// Log the analytics projection as one structured event, then drop it.
pub fn emit_analytics(analytics: &JobAnalytics) {
    match serde_json::to_string(analytics) {
        Ok(payload) => info!(
            subsystem = "jobs",
            op = "job_analytics",
            action = %analytics.action,
            duration_ms = analytics.perf_time,
            success = analytics.job_status == "success",
            %payload,
            "Job completed"
        ),
        Err(e) => warn!(error = %e, "Analytics serialization failed"),
    }
}
