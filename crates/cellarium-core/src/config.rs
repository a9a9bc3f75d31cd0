//! Orchestrator configuration.
//!
//! Loaded once at process start and read-only thereafter; passed by reference
//! into the submission service and worker. No global mutable state.

use crate::defaults;
use crate::models::IngestAction;

/// Static configuration for the job orchestration layer.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Cloud project hosting the batch jobs.
    pub project: String,
    /// Batch API location, e.g. "us-central1".
    pub location: String,
    /// Deployment environment label: "development", "staging", "production".
    pub environment: String,
    /// Base URL of the batch execution API.
    pub batch_api_base: String,
    /// Bearer token for the batch API (minted externally from SA credentials).
    pub auth_token: String,
    /// Ingest pipeline image URI, tag included.
    pub ingest_image: String,
    /// Differential expression image URI.
    pub de_image: String,
    /// Image pipeline image URI.
    pub image_pipeline_image: String,
    /// Dot plot rendering image URI.
    pub dot_plot_image: String,
    /// Service account the job VMs run as.
    pub service_account: Option<String>,
    /// VPC network for job VMs; jobs get no external IP.
    pub network: Option<String>,
    pub subnetwork: Option<String>,
    /// Request spot (preemptible) VMs.
    pub use_spot: bool,
    /// Hours before an unfinished sibling parse stops gating new ingests.
    pub gate_staleness_hours: i64,
    /// Maximum upload/parse retries before a file is marked failed.
    pub max_file_retries: i32,
    /// Largest machine type the file-size scaler may select.
    pub max_machine_type: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project: "cellarium-dev".to_string(),
            location: "us-central1".to_string(),
            environment: "development".to_string(),
            batch_api_base: defaults::BATCH_API_BASE.to_string(),
            auth_token: String::new(),
            ingest_image: "gcr.io/cellarium-dev/ingest-pipeline:1.36.2".to_string(),
            de_image: "gcr.io/cellarium-dev/de-pipeline:0.9.1".to_string(),
            image_pipeline_image: "gcr.io/cellarium-dev/image-pipeline:0.3.0".to_string(),
            dot_plot_image: "gcr.io/cellarium-dev/dot-plot:0.2.4".to_string(),
            service_account: None,
            network: None,
            subnetwork: None,
            use_spot: false,
            gate_staleness_hours: defaults::GATE_STALENESS_HOURS,
            max_file_retries: defaults::MAX_FILE_RETRIES,
            max_machine_type: defaults::MAX_MACHINE_TYPE.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with fallback to
    /// defaults.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CELLARIUM_PROJECT` | `cellarium-dev` |
    /// | `CELLARIUM_LOCATION` | `us-central1` |
    /// | `CELLARIUM_ENVIRONMENT` | `development` |
    /// | `CELLARIUM_BATCH_API_BASE` | Batch API public endpoint |
    /// | `CELLARIUM_BATCH_TOKEN` | empty |
    /// | `CELLARIUM_INGEST_IMAGE` etc. | dev image URIs |
    /// | `CELLARIUM_GATE_STALENESS_HOURS` | `24` |
    /// | `CELLARIUM_MAX_FILE_RETRIES` | `3` |
    /// | `CELLARIUM_MAX_MACHINE_TYPE` | `n2d-highmem-96` |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let string_vars: [(&str, &mut String); 9] = [
            ("CELLARIUM_PROJECT", &mut config.project),
            ("CELLARIUM_LOCATION", &mut config.location),
            ("CELLARIUM_ENVIRONMENT", &mut config.environment),
            ("CELLARIUM_BATCH_API_BASE", &mut config.batch_api_base),
            ("CELLARIUM_BATCH_TOKEN", &mut config.auth_token),
            ("CELLARIUM_INGEST_IMAGE", &mut config.ingest_image),
            ("CELLARIUM_DE_IMAGE", &mut config.de_image),
            ("CELLARIUM_IMAGE_PIPELINE_IMAGE", &mut config.image_pipeline_image),
            ("CELLARIUM_DOT_PLOT_IMAGE", &mut config.dot_plot_image),
        ];
        for (var, slot) in string_vars {
            if let Ok(val) = std::env::var(var) {
                if !val.is_empty() {
                    *slot = val;
                }
            }
        }

        if let Ok(val) = std::env::var("CELLARIUM_SERVICE_ACCOUNT") {
            config.service_account = Some(val);
        }
        if let Ok(val) = std::env::var("CELLARIUM_NETWORK") {
            config.network = Some(val);
        }
        if let Ok(val) = std::env::var("CELLARIUM_SUBNETWORK") {
            config.subnetwork = Some(val);
        }
        if let Ok(val) = std::env::var("CELLARIUM_USE_SPOT") {
            config.use_spot = val == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("CELLARIUM_GATE_STALENESS_HOURS") {
            if let Ok(hours) = val.parse::<i64>() {
                config.gate_staleness_hours = hours.max(1);
            } else {
                tracing::warn!(value = %val, "Invalid CELLARIUM_GATE_STALENESS_HOURS, using default");
            }
        }
        if let Ok(val) = std::env::var("CELLARIUM_MAX_FILE_RETRIES") {
            if let Ok(n) = val.parse::<i32>() {
                config.max_file_retries = n.max(0);
            } else {
                tracing::warn!(value = %val, "Invalid CELLARIUM_MAX_FILE_RETRIES, using default");
            }
        }
        if let Ok(val) = std::env::var("CELLARIUM_MAX_MACHINE_TYPE") {
            if !val.is_empty() {
                config.max_machine_type = val;
            }
        }

        config
    }

    /// Container image URI for an action.
    pub fn image_for(&self, action: IngestAction) -> &str {
        match action {
            IngestAction::IngestCluster
            | IngestAction::IngestCellMetadata
            | IngestAction::IngestExpression
            | IngestAction::IngestAnnData
            | IngestAction::ScviTraining => &self.ingest_image,
            IngestAction::DifferentialExpression => &self.de_image,
            IngestAction::ImagePipeline => &self.image_pipeline_image,
            IngestAction::RenderDotPlotGenes => &self.dot_plot_image,
        }
    }

    /// Docker tag portion of an action's image URI, "latest" when untagged.
    pub fn docker_tag_for(&self, action: IngestAction) -> &str {
        let image = self.image_for(action);
        image.rsplit_once(':').map(|(_, tag)| tag).unwrap_or("latest")
    }
}
