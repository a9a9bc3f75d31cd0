//! Orchestrator worker: an explicit task queue over a bounded pool.
//!
//! Every unit of asynchronous work is an [`OrchestratorTask`] on an mpsc
//! channel. A single worker loop feeds a `JoinSet` capped at the configured
//! concurrency; poll tasks requeue themselves through a detached timer so a
//! waiting job never occupies a pool slot.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use cellarium_batch::ComputeBackend;
use cellarium_core::{
    defaults, Annotation, AnnotationRepository, DerivedDataRepository, Error, FileType, JobRecord,
    JobRecordRepository, JobStatus, OrchestratorConfig, ParseStatus, Result, StudyFileRepository,
};

use crate::cleanup::{RetryCoordinator, RetryDecision};
use crate::de;
use crate::params::JobParams;
use crate::poller::{job_done, job_short_id, CompletionHandler, CompletionOutcome};
use crate::submit::JobSubmissionService;

/// Configuration for the orchestrator worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between status polls for one in-flight job (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum concurrently executing orchestrator tasks.
    pub max_concurrent: usize,
    /// Whether to process tasks at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            max_concurrent: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable task processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent tasks |
    /// | `JOB_POLL_INTERVAL_MS` | `30000` | Interval between job status polls |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// One unit of orchestration work.
#[derive(Debug, Clone)]
pub enum OrchestratorTask {
    /// Check a submitted job's backend status; requeues itself while live.
    Poll { record_id: Uuid },
    /// Run the purge/retry decision for a failed job's file.
    Retry { record_id: Uuid },
    /// Submit a differential-expression job for one eligible annotation.
    LaunchDifferentialExpression {
        record_id: Uuid,
        annotation: Annotation,
    },
}

/// Event emitted by the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was submitted to the backend.
    JobSubmitted { record_id: Uuid, job_name: String },
    /// A polled job reached SUCCEEDED.
    JobSucceeded { record_id: Uuid, job_name: String },
    /// A polled job reached FAILED.
    JobFailed { record_id: Uuid, error: String },
    /// A failed file was purged and requeued.
    RetryScheduled { file_id: Uuid, attempt: i32 },
    /// A file hit the retry cap and was terminally failed.
    RetryExhausted { file_id: Uuid },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task_tx: mpsc::Sender<OrchestratorTask>,
}

impl WorkerHandle {
    /// Enqueue a task for the worker pool.
    pub async fn enqueue(&self, task: OrchestratorTask) -> Result<()> {
        self.task_tx
            .send(task)
            .await
            .map_err(|_| Error::Internal("Worker task channel closed".into()))
    }

    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Shared state every spawned task executes against.
struct TaskContext {
    backend: Arc<dyn ComputeBackend>,
    job_records: Arc<dyn JobRecordRepository>,
    study_files: Arc<dyn StudyFileRepository>,
    submitter: JobSubmissionService,
    completion: CompletionHandler,
    retries: RetryCoordinator,
    poll_interval: Duration,
    event_tx: broadcast::Sender<WorkerEvent>,
}

/// The orchestrator worker.
pub struct OrchestratorWorker {
    ctx: Arc<TaskContext>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    task_tx: mpsc::Sender<OrchestratorTask>,
    task_rx: mpsc::Receiver<OrchestratorTask>,
}

impl OrchestratorWorker {
    pub fn new(
        config: WorkerConfig,
        orchestrator: OrchestratorConfig,
        backend: Arc<dyn ComputeBackend>,
        study_files: Arc<dyn StudyFileRepository>,
        job_records: Arc<dyn JobRecordRepository>,
        derived: Arc<dyn DerivedDataRepository>,
        annotations: Arc<dyn AnnotationRepository>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let (task_tx, task_rx) = mpsc::channel(defaults::TASK_CHANNEL_CAPACITY);

        let submitter = JobSubmissionService::new(
            orchestrator.clone(),
            backend.clone(),
            job_records.clone(),
            study_files.clone(),
        );
        let completion = CompletionHandler::new(
            backend.clone(),
            job_records.clone(),
            study_files.clone(),
            derived.clone(),
            annotations.clone(),
        );
        let retries = RetryCoordinator::new(
            study_files.clone(),
            derived,
            orchestrator.max_file_retries,
        );

        let ctx = Arc::new(TaskContext {
            backend,
            job_records,
            study_files,
            submitter,
            completion,
            retries,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            event_tx: event_tx.clone(),
        });

        Self {
            ctx,
            config,
            event_tx,
            task_tx,
            task_rx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Enqueue a poll for every job record not yet in a terminal state.
    /// Called once at startup so a restart resumes polling in-flight jobs.
    pub async fn recover_unfinished(&self) -> Result<usize> {
        let unfinished = self.ctx.job_records.list_unfinished().await?;
        let count = unfinished.len();
        for record in unfinished {
            self.task_tx
                .send(OrchestratorTask::Poll {
                    record_id: record.id,
                })
                .await
                .map_err(|_| Error::Internal("Worker task channel closed".into()))?;
        }
        if count > 0 {
            info!(subsystem = "worker", recovered = count, "Resuming unfinished jobs");
        }
        Ok(count)
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let task_tx = self.task_tx.clone();

        let ctx = self.ctx;
        let config = self.config;
        let event_tx = self.event_tx;
        let mut task_rx = self.task_rx;
        let loop_task_tx = self.task_tx;

        tokio::spawn(async move {
            run(ctx, config, event_tx, &mut task_rx, loop_task_tx, &mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task_tx,
        }
    }
}

/// Worker loop: pull tasks, execute on a bounded pool, drain on shutdown.
#[instrument(skip_all)]
async fn run(
    ctx: Arc<TaskContext>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    task_rx: &mut mpsc::Receiver<OrchestratorTask>,
    task_tx: mpsc::Sender<OrchestratorTask>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) {
    if !config.enabled {
        info!("Orchestrator worker is disabled, not starting");
        return;
    }

    info!(
        poll_interval_ms = config.poll_interval_ms,
        max_concurrent = config.max_concurrent,
        "Orchestrator worker started"
    );
    let _ = event_tx.send(WorkerEvent::WorkerStarted);

    let mut pool: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Orchestrator worker received shutdown signal");
                break;
            }
            task = task_rx.recv() => {
                let Some(task) = task else { break };

                // Bound the pool before spawning.
                while pool.len() >= config.max_concurrent {
                    if let Some(Err(e)) = pool.join_next().await {
                        error!(error = ?e, "Orchestrator task panicked");
                    }
                }

                let ctx = ctx.clone();
                let task_tx = task_tx.clone();
                pool.spawn(async move {
                    ctx.execute(task, task_tx).await;
                });
            }
        }
    }

    // Let in-flight tasks finish; queued-but-unspawned tasks are recovered
    // from the database on next startup.
    while let Some(result) = pool.join_next().await {
        if let Err(e) = result {
            error!(error = ?e, "Orchestrator task panicked");
        }
    }

    let _ = event_tx.send(WorkerEvent::WorkerStopped);
    info!("Orchestrator worker stopped");
}

impl TaskContext {
    async fn execute(self: Arc<Self>, task: OrchestratorTask, task_tx: mpsc::Sender<OrchestratorTask>) {
        let result = match task {
            OrchestratorTask::Poll { record_id } => self.poll(record_id, &task_tx).await,
            OrchestratorTask::Retry { record_id } => self.retry(record_id, &task_tx).await,
            OrchestratorTask::LaunchDifferentialExpression {
                record_id,
                annotation,
            } => self.launch_de(record_id, &annotation, &task_tx).await,
        };
        if let Err(e) = result {
            error!(subsystem = "worker", error = %e, "Orchestrator task failed");
        }
    }

    async fn record(&self, record_id: Uuid) -> Result<Option<JobRecord>> {
        let record = self.job_records.get(record_id).await?;
        if record.is_none() {
            warn!(job_id = %record_id, "Job record vanished, dropping task");
        }
        Ok(record)
    }

    /// Requeue a task after a delay without holding a pool slot.
    fn requeue_after(
        &self,
        task_tx: &mpsc::Sender<OrchestratorTask>,
        task: OrchestratorTask,
        delay: Duration,
    ) {
        let task_tx = task_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = task_tx.send(task).await;
        });
    }

    async fn poll(
        &self,
        record_id: Uuid,
        task_tx: &mpsc::Sender<OrchestratorTask>,
    ) -> Result<()> {
        let Some(record) = self.record(record_id).await? else {
            return Ok(());
        };
        // Terminal but unreported records re-run completion; the CAS inside
        // keeps reporting at-most-once.
        if record.status.is_terminal() && record.analytics_reported {
            return Ok(());
        }

        let short_id = job_short_id(&record.job_name);
        let job = match self.backend.get_job(short_id).await {
            Ok(job) => job,
            Err(e) => {
                // Transient backend errors: keep polling, the job may still
                // be running.
                warn!(job_name = %record.job_name, error = %e, "Status poll failed");
                self.requeue_after(
                    task_tx,
                    OrchestratorTask::Poll { record_id },
                    self.poll_interval,
                );
                return Ok(());
            }
        };

        if !job_done(&job) {
            debug!(job_name = %record.job_name, state = ?job.state(), "Job still running");
            if record.status == JobStatus::Submitted {
                self.job_records
                    .update_status(record.id, JobStatus::Running, None)
                    .await?;
            }
            self.requeue_after(
                task_tx,
                OrchestratorTask::Poll { record_id },
                self.poll_interval,
            );
            return Ok(());
        }

        let outcome = match self.completion.handle_completion(&record, &job).await {
            Ok(outcome) => outcome,
            // Transient repository errors: nothing was reported, poll again.
            Err(e) => {
                warn!(job_name = %record.job_name, error = %e, "Completion handling failed");
                self.requeue_after(
                    task_tx,
                    OrchestratorTask::Poll { record_id },
                    self.poll_interval,
                );
                return Ok(());
            }
        };
        match outcome {
            CompletionOutcome::AlreadyReported => {}
            CompletionOutcome::Succeeded { de_annotations, .. } => {
                // Computation jobs (DE, scVI, plots) leave the source file's
                // parse lifecycle alone.
                if record.action.is_ingest() {
                    self.study_files
                        .update_parse_status(record.study_file_id, ParseStatus::Parsed)
                        .await?;
                }
                let _ = self.event_tx.send(WorkerEvent::JobSucceeded {
                    record_id: record.id,
                    job_name: record.job_name.clone(),
                });
                for annotation in de_annotations {
                    let _ = task_tx
                        .send(OrchestratorTask::LaunchDifferentialExpression {
                            record_id: record.id,
                            annotation,
                        })
                        .await;
                }
            }
            CompletionOutcome::Failed { analytics } => {
                let error = analytics
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed without backend detail".to_string());
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    record_id: record.id,
                    error,
                });
                let _ = task_tx
                    .send(OrchestratorTask::Retry {
                        record_id: record.id,
                    })
                    .await;
            }
        }
        Ok(())
    }

    async fn retry(
        self: &Arc<Self>,
        record_id: Uuid,
        task_tx: &mpsc::Sender<OrchestratorTask>,
    ) -> Result<()> {
        let Some(record) = self.record(record_id).await? else {
            return Ok(());
        };
        let file = self.study_files.fetch(record.study_file_id).await?;
        let error = record
            .error_message
            .clone()
            .unwrap_or_else(|| "job failed".to_string());

        match self
            .retries
            .handle_failure(record.action, &file, &error)
            .await?
        {
            RetryDecision::Exhausted { .. } => {
                let _ = self
                    .event_tx
                    .send(WorkerEvent::RetryExhausted { file_id: file.id });
            }
            RetryDecision::Scheduled { attempt, delay } => {
                let _ = self.event_tx.send(WorkerEvent::RetryScheduled {
                    file_id: file.id,
                    attempt,
                });
                let params = record
                    .params
                    .clone()
                    .ok_or_else(|| Error::Internal("Job record has no params to retry".into()))?;
                let params: JobParams = serde_json::from_value(params)?;
                let record_id = record.id;
                let task_tx = task_tx.clone();
                let requester = record.requester.clone();
                // Detached timer so the backoff never holds a pool slot.
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let mut wait = delay;
                    loop {
                        sleep(wait).await;
                        match this.submitter.run_job(&file, &requester, &params).await {
                            Ok(new_record) => {
                                let _ = this.event_tx.send(WorkerEvent::JobSubmitted {
                                    record_id: new_record.id,
                                    job_name: new_record.job_name.clone(),
                                });
                                let _ = task_tx
                                    .send(OrchestratorTask::Poll {
                                        record_id: new_record.id,
                                    })
                                    .await;
                            }
                            Err(Error::Gated(reason)) => {
                                // A sibling parse holds the gate; wait it out
                                // without spending a retry attempt.
                                debug!(job_id = %record_id, %reason, "Resubmission gated");
                                wait = this.poll_interval;
                                continue;
                            }
                            Err(e) => {
                                error!(
                                    job_id = %record_id,
                                    error = %e,
                                    "Retry resubmission failed"
                                );
                                // Count the failed resubmission against the cap.
                                let _ = task_tx
                                    .send(OrchestratorTask::Retry { record_id })
                                    .await;
                            }
                        }
                        break;
                    }
                });
            }
        }
        Ok(())
    }

    async fn launch_de(
        &self,
        record_id: Uuid,
        annotation: &Annotation,
        task_tx: &mpsc::Sender<OrchestratorTask>,
    ) -> Result<()> {
        let Some(record) = self.record(record_id).await? else {
            return Ok(());
        };
        let file = self.study_files.fetch(record.study_file_id).await?;

        // Cluster context: the annotation's own cluster when named, else the
        // first parsed cluster sibling in the study.
        let siblings = self.study_files.siblings(file.study_id, file.id).await?;
        let cluster_file = siblings
            .iter()
            .find(|s| {
                s.file_type == FileType::Cluster
                    && s.parse_status.is_complete()
                    && annotation
                        .cluster_name
                        .as_ref()
                        .map_or(true, |name| &s.name == name)
            })
            .unwrap_or(&file);
        let cluster_name = annotation
            .cluster_name
            .clone()
            .unwrap_or_else(|| cluster_file.name.clone());

        let params = JobParams::DifferentialExpression(de::de_params_for(
            annotation,
            &cluster_name,
            cluster_file,
            &file,
        ));

        let new_record = self
            .submitter
            .run_job(&file, &record.requester, &params)
            .await?;
        let _ = self.event_tx.send(WorkerEvent::JobSubmitted {
            record_id: new_record.id,
            job_name: new_record.job_name.clone(),
        });
        let _ = task_tx
            .send(OrchestratorTask::Poll {
                record_id: new_record.id,
            })
            .await;
        Ok(())
    }

}

/// Explicitly abort a submitted job: forward the deletion to the backend and
/// mark the record aborted. The only cancellation path; the staleness window
/// never cancels anything.
pub async fn abort_job(
    backend: &dyn ComputeBackend,
    job_records: &dyn JobRecordRepository,
    record_id: Uuid,
) -> Result<()> {
    let record = job_records
        .get(record_id)
        .await?
        .ok_or_else(|| Error::JobNotFound(record_id.to_string()))?;
    backend.delete_job(job_short_id(&record.job_name)).await?;
    job_records
        .update_status(record.id, JobStatus::Aborted, Some("aborted by request"))
        .await?;
    info!(job_name = %record.job_name, "Job aborted");
    Ok(())
}
