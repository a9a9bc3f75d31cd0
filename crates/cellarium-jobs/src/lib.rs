//! # cellarium-jobs
//!
//! Ingest job orchestration layer for cellarium.
//!
//! This crate provides:
//! - Parameter builders rendering container command arrays per action
//! - Machine-type scaling and compute resource derivation
//! - The job submission service (one backend job + one record per call)
//! - The expression-family concurrency gate
//! - Status polling with idempotent completion handling and analytics
//! - Differential-expression eligibility and launch planning
//! - The purge/retry coordinator for failed parses
//! - The task-queue worker tying all of it together
//!
//! ## Example
//!
//! ```rust,ignore
//! use cellarium_jobs::worker::{OrchestratorWorker, WorkerConfig};
//!
//! let worker = OrchestratorWorker::new(
//!     WorkerConfig::from_env(),
//!     config,
//!     backend,
//!     study_files,
//!     job_records,
//!     derived,
//!     annotations,
//! );
//! worker.recover_unfinished().await?;
//! let handle = worker.start();
//! handle.enqueue(OrchestratorTask::Poll { record_id }).await?;
//! ```

pub mod cleanup;
pub mod de;
pub mod gate;
pub mod machine;
pub mod params;
pub mod poller;
pub mod submit;
pub mod worker;

pub use cleanup::{RetryCoordinator, RetryDecision};
pub use gate::{can_launch_ingest, check_ingest_gate, GateBlock};
pub use params::{JobParams, ToOptionsArray, Validate, ValidationErrors};
pub use poller::{exit_code_from_task, job_done, CompletionHandler, CompletionOutcome};
pub use submit::JobSubmissionService;
pub use worker::{OrchestratorTask, OrchestratorWorker, WorkerConfig, WorkerEvent, WorkerHandle};
