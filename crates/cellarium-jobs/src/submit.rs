//! Job submission service.
//!
//! One `run_job` call produces exactly one backend `create_job` request and
//! one persisted job record. The generated short job ID becomes the backend
//! job name, which is the single source of truth for all later polling.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use cellarium_batch::{
    AllocationPolicy, BatchJobRequest, ComputeBackend, Container, Disk, Environment,
    InstancePolicy, InstancePolicyOrTemplate, NetworkInterface, NetworkPolicy, Runnable,
    ServiceAccount, TaskGroup, TaskSpec,
};
use cellarium_core::{
    defaults, Error, JobRecord, JobRecordRepository, JobStatus, OrchestratorConfig, Result,
    StudyFile, StudyFileRepository,
};

use crate::gate;
use crate::machine;
use crate::params::JobParams;

/// Builds batch requests from parameters and records each submission.
pub struct JobSubmissionService {
    config: OrchestratorConfig,
    backend: Arc<dyn ComputeBackend>,
    job_records: Arc<dyn JobRecordRepository>,
    study_files: Arc<dyn StudyFileRepository>,
}

impl JobSubmissionService {
    pub fn new(
        config: OrchestratorConfig,
        backend: Arc<dyn ComputeBackend>,
        job_records: Arc<dyn JobRecordRepository>,
        study_files: Arc<dyn StudyFileRepository>,
    ) -> Self {
        Self {
            config,
            backend,
            job_records,
            study_files,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submit one job for a study file and persist its record.
    ///
    /// Ingest submissions pass through the expression-family concurrency gate
    /// first and come back as [`Error::Gated`] while a sibling parse holds it.
    /// Backend errors are normalized by the client, logged here, and surfaced
    /// to the caller; no retry happens at this boundary.
    pub async fn run_job(
        &self,
        file: &StudyFile,
        requester: &str,
        params: &JobParams,
    ) -> Result<JobRecord> {
        params.validate()?;

        let action = params.action();
        if action.is_ingest() {
            if let Err(block) = gate::check_ingest_gate(
                self.study_files.as_ref(),
                file,
                self.config.gate_staleness_hours,
            )
            .await?
            {
                return Err(Error::Gated(format!(
                    "file {} is waiting on sibling {} ({})",
                    file.id, block.blocking_file_name, block.blocking_file_id
                )));
            }
        }
        let machine_type = params.machine_type(&self.config.max_machine_type);
        machine::validate_machine_type(&machine_type)?;

        let job_id = generate_job_id(action);
        let request = self.build_request(file, params, &machine_type);

        // Field names follow cellarium_core::logging.
        info!(
            subsystem = "jobs",
            op = "run_job",
            job_name = %job_id,
            action = %action,
            study_accession = %file.study_accession,
            file_id = %file.id,
            machine_type = %machine_type,
            "Submitting batch job"
        );

        let job = match self.backend.create_job(&job_id, request, requester).await {
            Ok(job) => job,
            Err(e) => {
                error!(
                    subsystem = "jobs",
                    op = "run_job",
                    job_name = %job_id,
                    error = %e,
                    "Batch job creation failed"
                );
                return Err(e);
            }
        };

        let record = JobRecord {
            id: Uuid::new_v4(),
            job_name: job.name.clone(),
            action,
            study_id: file.study_id,
            study_file_id: file.id,
            requester: requester.to_string(),
            machine_type,
            status: JobStatus::Submitted,
            analytics_reported: false,
            params: Some(serde_json::to_value(params)?),
            error_message: None,
            submitted_at: Utc::now(),
            completed_at: None,
        };
        self.job_records.insert(&record).await?;

        Ok(record)
    }

    fn build_request(
        &self,
        file: &StudyFile,
        params: &JobParams,
        machine_type: &str,
    ) -> BatchJobRequest {
        let action = params.action();

        // The container CLI contract: study identity first, then the action
        // flag and its options.
        let mut commands = vec![
            "--study-id".to_string(),
            file.study_id.to_string(),
            "--study-file-id".to_string(),
            file.id.to_string(),
        ];
        commands.extend(params.to_options_array());

        let container = Container {
            image_uri: self.config.image_for(action).to_string(),
            entrypoint: None,
            commands,
        };

        let mut variables = HashMap::new();
        variables.insert(
            "CELLARIUM_ENVIRONMENT".to_string(),
            self.config.environment.clone(),
        );
        variables.insert("STUDY_ACCESSION".to_string(), file.study_accession.clone());

        let task_spec = TaskSpec {
            runnables: vec![Runnable {
                container,
                environment: Some(Environment { variables }),
            }],
            compute_resource: machine::compute_resource(machine_type),
            max_retry_count: 0,
        };

        let network = if self.config.network.is_some() || self.config.subnetwork.is_some() {
            Some(NetworkPolicy {
                network_interfaces: vec![NetworkInterface {
                    network: self.config.network.clone(),
                    subnetwork: self.config.subnetwork.clone(),
                    no_external_ip_address: true,
                }],
            })
        } else {
            None
        };

        let allocation_policy = AllocationPolicy {
            instances: vec![InstancePolicyOrTemplate {
                policy: InstancePolicy {
                    machine_type: machine_type.to_string(),
                    provisioning_model: self.config.use_spot.then(|| "SPOT".to_string()),
                    boot_disk: Some(Disk {
                        size_gb: defaults::BOOT_DISK_SIZE_GB,
                        disk_type: None,
                    }),
                },
            }],
            network,
            service_account: self
                .config
                .service_account
                .clone()
                .map(|email| ServiceAccount { email }),
        };

        BatchJobRequest {
            task_groups: vec![TaskGroup {
                task_spec,
                task_count: 1,
            }],
            allocation_policy,
            labels: self.build_labels(file, action, machine_type),
        }
    }

    fn build_labels(
        &self,
        file: &StudyFile,
        action: cellarium_core::IngestAction,
        machine_type: &str,
    ) -> HashMap<String, String> {
        let image = self.config.image_for(action);
        let image_name = image
            .rsplit_once(':')
            .map(|(name, _)| name)
            .unwrap_or(image)
            .rsplit('/')
            .next()
            .unwrap_or(image);

        let mut labels = HashMap::new();
        labels.insert(
            "study_accession".to_string(),
            sanitize_label(&file.study_accession),
        );
        labels.insert("ingest_action".to_string(), sanitize_label(action.as_str()));
        labels.insert("machine_type".to_string(), sanitize_label(machine_type));
        labels.insert("docker_image".to_string(), sanitize_label(image_name));
        labels.insert(
            "docker_tag".to_string(),
            sanitize_label(self.config.docker_tag_for(action)),
        );
        labels.insert(
            "environment".to_string(),
            sanitize_label(&self.config.environment),
        );
        labels.insert(
            "file_type".to_string(),
            sanitize_label(file.file_type.as_str()),
        );
        labels
    }
}

/// Short backend job ID: action prefix plus a fresh UUID, hyphenated.
pub fn generate_job_id(action: cellarium_core::IngestAction) -> String {
    format!(
        "{}-{}",
        action.as_str().replace('_', "-"),
        Uuid::new_v4()
    )
}

/// Sanitize a label value to backend constraints: lowercase, every character
/// outside `[a-z0-9_-]` replaced with `_`, truncated to 63 characters.
pub fn sanitize_label(value: &str) -> String {
    let mut out: String = value
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(defaults::LABEL_MAX_LENGTH);
    out
}
