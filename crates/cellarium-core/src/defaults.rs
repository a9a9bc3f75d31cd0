//! Centralized default constants for the cellarium orchestrator.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// CONCURRENCY GATE
// =============================================================================

/// Hours after which an unfinished sibling parse is presumed abandoned and no
/// longer blocks new ingest submissions. The fallback against permanent
/// deadlock from a stuck job; never used to cancel anything.
pub const GATE_STALENESS_HOURS: i64 = 24;

// =============================================================================
// RETRY / CLEANUP
// =============================================================================

/// Maximum retry attempts for a failed upload/parse before the file is marked
/// permanently failed.
pub const MAX_FILE_RETRIES: i32 = 3;

/// Base delay between retry attempts in seconds (jitter is added on top).
pub const RETRY_BACKOFF_BASE_SECS: u64 = 30;

// =============================================================================
// JOB WORKER
// =============================================================================

/// Default interval between status polls for an in-flight job (milliseconds).
pub const JOB_POLL_INTERVAL_MS: u64 = 30_000;

/// Default maximum concurrently processed orchestrator tasks per worker.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Default worker event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default orchestrator task channel capacity.
pub const TASK_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// COMPUTE BACKEND
// =============================================================================

/// Default machine type requested when no scaling rule applies.
pub const DEFAULT_MACHINE_TYPE: &str = "n2d-highmem-8";

/// Largest machine type the file-size scaler may select.
pub const MAX_MACHINE_TYPE: &str = "n2d-highmem-96";

/// Default boot disk size in GB for ingest containers.
pub const BOOT_DISK_SIZE_GB: i64 = 300;

/// Maximum length of a backend label value; longer values are truncated.
pub const LABEL_MAX_LENGTH: usize = 63;

/// Timeout for compute backend HTTP requests in seconds.
pub const BATCH_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default base URL for the batch execution API.
pub const BATCH_API_BASE: &str = "https://batch.googleapis.com/v1";

// =============================================================================
// DIFFERENTIAL EXPRESSION
// =============================================================================

/// Minimum number of distinct groups an annotation needs to be DE-eligible.
pub const DE_MIN_GROUPS: usize = 2;

/// Suffix distinguishing user-supplied annotations from their ontology-labeled
/// ("official") counterparts during deduplication.
pub const CUSTOM_ANNOTATION_SUFFIX: &str = "__custom";
