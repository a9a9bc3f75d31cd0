//! Wire types for the cloud batch execution API.
//!
//! Field names follow the backend's camelCase JSON. Only the slice of the API
//! surface the orchestrator reads or writes is modeled here.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Backend job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    StateUnspecified,
    Queued,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    DeletionInProgress,
}

impl JobState {
    /// True for either terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// One timestamped event in a job or task status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub description: String,
    pub event_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_execution: Option<TaskExecution>,
}

/// Container exit status embedded in a task's final event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    #[serde(default)]
    pub exit_code: i32,
}

/// Aggregated job status block.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobStatus {
    #[serde(default)]
    pub state: JobState,
    #[serde(default)]
    pub status_events: Vec<StatusEvent>,
}

/// Container to run inside a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Environment variables exposed to a runnable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// One executable unit of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runnable {
    pub container: Container,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
}

/// CPU/memory/disk requested for each task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResource {
    #[serde(default)]
    pub cpu_milli: i64,
    #[serde(default)]
    pub memory_mib: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_disk_mib: Option<i64>,
}

/// Task specification: runnables plus resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub runnables: Vec<Runnable>,
    pub compute_resource: ComputeResource,
    #[serde(default)]
    pub max_retry_count: i32,
}

/// Group of identical tasks; ingest jobs always run a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub task_spec: TaskSpec,
    #[serde(default = "default_task_count")]
    pub task_count: i64,
}

fn default_task_count() -> i64 {
    1
}

/// Boot disk attached to job VMs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    #[serde(default)]
    pub size_gb: i64,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
}

/// VM shape for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePolicy {
    pub machine_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_disk: Option<Disk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstancePolicyOrTemplate {
    pub policy: InstancePolicy,
}

/// Network attachment for job VMs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnetwork: Option<String>,
    #[serde(default)]
    pub no_external_ip_address: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub email: String,
}

/// Where and how job VMs are allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPolicy {
    pub instances: Vec<InstancePolicyOrTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccount>,
}

impl AllocationPolicy {
    /// Machine type of the first instance policy, if any.
    pub fn machine_type(&self) -> Option<&str> {
        self.instances
            .first()
            .map(|i| i.policy.machine_type.as_str())
    }

    /// Boot disk size of the first instance policy, if any.
    pub fn boot_disk_size_gb(&self) -> Option<i64> {
        self.instances
            .first()
            .and_then(|i| i.policy.boot_disk.as_ref())
            .map(|d| d.size_gb)
    }
}

/// Request body for job creation. Ephemeral: built by the submission service
/// for one `create_job` call and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobRequest {
    pub task_groups: Vec<TaskGroup>,
    pub allocation_policy: AllocationPolicy,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A job as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    /// Fully qualified resource name.
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub task_groups: Vec<TaskGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocation_policy: Option<AllocationPolicy>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub status: BatchJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn state(&self) -> JobState {
        self.status.state
    }

    /// Backend-reported error description from the last failure event, if any.
    pub fn error_description(&self) -> Option<&str> {
        if self.status.state != JobState::Failed {
            return None;
        }
        self.status
            .status_events
            .iter()
            .rev()
            .find(|e| e.event_type.as_deref() == Some("STATUS_CHANGED") || !e.description.is_empty())
            .map(|e| e.description.as_str())
    }
}

/// A task as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub status: BatchJobStatus,
}

/// Paged job listing.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsResponse {
    #[serde(default)]
    pub jobs: Vec<BatchJob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Structured error body returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}
