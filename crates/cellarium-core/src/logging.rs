//! Structured logging field name constants for cellarium.
//!
//! All crates use these constants for consistent structured logging fields so
//! log aggregation tools can query by standardized names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, submissions, completions |
//! | DEBUG | Decision points (gate verdicts, machine sizing, retries) |
//! | TRACE | Per-poll status detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "batch", "db", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "run_job", "poll", "purge", "launch_de"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Backend job name being operated on.
pub const JOB_NAME: &str = "job_name";

/// Job record UUID.
pub const JOB_ID: &str = "job_id";

/// Ingest action enum variant.
pub const ACTION: &str = "action";

/// Study accession (e.g. SCP1234).
pub const STUDY_ACCESSION: &str = "study_accession";

/// Study file UUID.
pub const FILE_ID: &str = "file_id";

/// Study file type.
pub const FILE_TYPE: &str = "file_type";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Machine type requested from the backend.
pub const MACHINE_TYPE: &str = "machine_type";

/// Container exit code on job failure.
pub const EXIT_CODE: &str = "exit_code";

/// Number of rows removed by a purge.
pub const PURGED_ROWS: &str = "purged_rows";

/// Retry attempt ordinal.
pub const RETRY_COUNT: &str = "retry_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
