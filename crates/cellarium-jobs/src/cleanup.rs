//! Retry and cleanup coordination for failed ingests.
//!
//! Every failure either schedules a retry or terminally fails the file;
//! nothing is dropped silently. Before a retry the coordinator purges the
//! partial derived records the failed parse may have written, scoped to the
//! action that produced them.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use cellarium_core::{
    defaults, DerivedDataRepository, IngestAction, ParseStatus, Result, StudyFile,
    StudyFileRepository,
};

/// Verdict for one failed ingest attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Purged and requeued; resubmit after the delay.
    Scheduled { attempt: i32, delay: Duration },
    /// Retry budget spent; the file is now terminally failed.
    Exhausted { attempts: i32 },
}

/// Coordinates purge-then-retry for failed parse jobs.
pub struct RetryCoordinator {
    study_files: Arc<dyn StudyFileRepository>,
    derived: Arc<dyn DerivedDataRepository>,
    max_retries: i32,
}

impl RetryCoordinator {
    pub fn new(
        study_files: Arc<dyn StudyFileRepository>,
        derived: Arc<dyn DerivedDataRepository>,
        max_retries: i32,
    ) -> Self {
        Self {
            study_files,
            derived,
            max_retries,
        }
    }

    /// Remove the derived records a failed run of `action` may have written.
    ///
    /// Purges are per-action so a cluster retry never touches expression
    /// rows, and compound-filtered so concurrent retries on other files in
    /// the same study never contend.
    pub async fn purge_for_action(&self, action: IngestAction, file: &StudyFile) -> Result<u64> {
        let removed = match action {
            IngestAction::IngestCellMetadata => {
                self.derived
                    .delete_cell_metadata(file.study_id, file.id)
                    .await?
            }
            IngestAction::IngestExpression => {
                self.derived.delete_genes(file.study_id, file.id).await?
            }
            IngestAction::IngestCluster => {
                // The cluster name is the display name derived from the file;
                // sibling clusters in the study are left alone.
                self.derived
                    .delete_cluster(file.study_id, file.id, &file.name)
                    .await?
            }
            IngestAction::IngestAnnData => {
                self.derived
                    .delete_all_fragments(file.study_id, file.id)
                    .await?
            }
            // Computation actions write no ingest fragments.
            IngestAction::DifferentialExpression
            | IngestAction::ScviTraining
            | IngestAction::RenderDotPlotGenes
            | IngestAction::ImagePipeline => 0,
        };

        if removed > 0 {
            info!(
                subsystem = "jobs",
                op = "purge",
                file_id = %file.id,
                action = %action,
                purged_rows = removed,
                "Purged partial ingest records"
            );
        }
        Ok(removed)
    }

    /// Record one failure and decide between retry and terminal failure.
    pub async fn handle_failure(
        &self,
        action: IngestAction,
        file: &StudyFile,
        error: &str,
    ) -> Result<RetryDecision> {
        let attempt = self.study_files.increment_retry(file.id).await?;

        if attempt > self.max_retries {
            warn!(
                subsystem = "jobs",
                op = "retry",
                file_id = %file.id,
                action = %action,
                retry_count = attempt,
                error = %error,
                "Retry budget exhausted, marking file failed"
            );
            self.study_files.mark_failed(file.id, error).await?;
            return Ok(RetryDecision::Exhausted { attempts: attempt });
        }

        self.purge_for_action(action, file).await?;
        self.study_files
            .update_parse_status(file.id, ParseStatus::Uploaded)
            .await?;

        let delay = retry_delay(attempt);
        info!(
            subsystem = "jobs",
            op = "retry",
            file_id = %file.id,
            action = %action,
            retry_count = attempt,
            delay_secs = delay.as_secs(),
            error = %error,
            "Retry scheduled"
        );
        Ok(RetryDecision::Scheduled { attempt, delay })
    }
}

/// Backoff for the given attempt: base doubled per attempt plus jitter, so
/// simultaneous failures do not resubmit in lockstep.
pub fn retry_delay(attempt: i32) -> Duration {
    let base = defaults::RETRY_BACKOFF_BASE_SECS * 2u64.pow(attempt.max(1) as u32 - 1);
    let jitter = rand::thread_rng().gen_range(0..defaults::RETRY_BACKOFF_BASE_SECS);
    Duration::from_secs(base + jitter)
}
