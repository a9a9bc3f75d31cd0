//! Mock compute backend for deterministic testing.
//!
//! Jobs are scripted: each `get_job` call pops the next state in the
//! sequence and holds at the last one, so tests can walk a job from
//! RUNNING to a terminal state across polls. Every call is logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cellarium_core::{Error, Result};

use crate::backend::ComputeBackend;
use crate::types::{
    BatchJob, BatchJobRequest, BatchJobStatus, JobState, StatusEvent, Task, TaskExecution,
};

/// One recorded backend call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub job_id: String,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, Vec<BatchJob>>,
    tasks: HashMap<String, Task>,
    created: Vec<(String, BatchJobRequest, String)>,
    deleted: Vec<String>,
    fail_next_create: Option<String>,
    calls: Vec<MockCall>,
}

/// Mock compute backend.
#[derive(Clone, Default)]
pub struct MockComputeBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockComputeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the sequence of states `get_job` walks through for a job.
    pub fn script_job(&self, job_id: &str, states: Vec<BatchJob>) {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(job_id.to_string(), states);
    }

    /// Set the task returned by `get_task` for a job.
    pub fn set_task(&self, job_id: &str, task: Task) {
        let mut state = self.state.lock().unwrap();
        state.tasks.insert(job_id.to_string(), task);
    }

    /// Make the next `create_job` fail with the given backend error message.
    pub fn fail_next_create(&self, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.fail_next_create = Some(message.to_string());
    }

    /// All job creation requests received so far.
    pub fn created_jobs(&self) -> Vec<(String, BatchJobRequest, String)> {
        self.state.lock().unwrap().created.clone()
    }

    /// Job IDs for which deletion was requested.
    pub fn deleted_jobs(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// Full call log.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    fn log(&self, operation: &str, job_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall {
            operation: operation.to_string(),
            job_id: job_id.to_string(),
        });
    }
}

#[async_trait]
impl ComputeBackend for MockComputeBackend {
    async fn create_job(
        &self,
        job_id: &str,
        request: BatchJobRequest,
        quota_user: &str,
    ) -> Result<BatchJob> {
        self.log("create_job", job_id);
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next_create.take() {
            return Err(Error::Batch(message));
        }
        let job = BatchJob {
            name: format!("projects/mock/locations/mock/jobs/{}", job_id),
            uid: job_id.to_string(),
            task_groups: request.task_groups.clone(),
            allocation_policy: Some(request.allocation_policy.clone()),
            labels: request.labels.clone(),
            status: BatchJobStatus {
                state: JobState::Queued,
                status_events: Vec::new(),
            },
            create_time: Some(Utc::now()),
        };
        state
            .created
            .push((job_id.to_string(), request, quota_user.to_string()));
        // If no script was provided, report the queued job from then on.
        state
            .scripts
            .entry(job_id.to_string())
            .or_insert_with(|| vec![job.clone()]);
        Ok(job)
    }

    async fn get_job(&self, job_id: &str) -> Result<BatchJob> {
        self.log("get_job", job_id);
        let mut state = self.state.lock().unwrap();
        let script = state
            .scripts
            .get_mut(job_id)
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        if script.is_empty() {
            return Err(Error::JobNotFound(job_id.to_string()));
        }
        if script.len() > 1 {
            Ok(script.remove(0))
        } else {
            Ok(script[0].clone())
        }
    }

    async fn list_jobs(&self, _filter: Option<&str>) -> Result<Vec<BatchJob>> {
        self.log("list_jobs", "");
        let state = self.state.lock().unwrap();
        Ok(state
            .scripts
            .values()
            .filter_map(|script| script.last().cloned())
            .collect())
    }

    async fn get_task(&self, job_id: &str) -> Result<Task> {
        self.log("get_task", job_id);
        let state = self.state.lock().unwrap();
        state
            .tasks
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        self.log("delete_job", job_id);
        let mut state = self.state.lock().unwrap();
        state.deleted.push(job_id.to_string());
        Ok(())
    }
}

/// Build a job snapshot in the given state with the given status events.
pub fn job_snapshot(job_id: &str, state: JobState, events: Vec<StatusEvent>) -> BatchJob {
    BatchJob {
        name: format!("projects/mock/locations/mock/jobs/{}", job_id),
        uid: job_id.to_string(),
        task_groups: Vec::new(),
        allocation_policy: None,
        labels: HashMap::new(),
        status: BatchJobStatus {
            state,
            status_events: events,
        },
        create_time: None,
    }
}

/// Build a status event at the given time.
pub fn status_event(description: &str, event_time: DateTime<Utc>) -> StatusEvent {
    StatusEvent {
        event_type: Some("STATUS_CHANGED".to_string()),
        description: description.to_string(),
        event_time,
        task_state: None,
        task_execution: None,
    }
}

/// Build a failed task whose last event embeds the given exit code.
pub fn failed_task(job_id: &str, exit_code: i32, event_time: DateTime<Utc>) -> Task {
    Task {
        name: format!(
            "projects/mock/locations/mock/jobs/{}/taskGroups/group0/tasks/0",
            job_id
        ),
        status: BatchJobStatus {
            state: JobState::Failed,
            status_events: vec![StatusEvent {
                event_type: Some("STATUS_CHANGED".to_string()),
                description: format!("task exited with code {}", exit_code),
                event_time,
                task_state: Some("FAILED".to_string()),
                task_execution: Some(TaskExecution { exit_code }),
            }],
        },
    }
}

/// Build a succeeded task with no exit-code event.
pub fn succeeded_task(job_id: &str, event_time: DateTime<Utc>) -> Task {
    Task {
        name: format!(
            "projects/mock/locations/mock/jobs/{}/taskGroups/group0/tasks/0",
            job_id
        ),
        status: BatchJobStatus {
            state: JobState::Succeeded,
            status_events: vec![StatusEvent {
                event_type: Some("STATUS_CHANGED".to_string()),
                description: "task succeeded".to_string(),
                event_time,
                task_state: Some("SUCCEEDED".to_string()),
                task_execution: None,
            }],
        },
    }
}
