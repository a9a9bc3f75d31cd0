//! Core data models for the cellarium ingest orchestrator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// ACTIONS
// =============================================================================

/// The closed set of compute actions the orchestrator can submit.
///
/// Each action maps to one parameter variant, one container image, and one
/// purge rule; exhaustive matches keep all three in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestAction {
    IngestCluster,
    IngestCellMetadata,
    IngestExpression,
    IngestAnnData,
    DifferentialExpression,
    ScviTraining,
    RenderDotPlotGenes,
    ImagePipeline,
}

impl IngestAction {
    /// Stable snake_case wire name, used in labels and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestAction::IngestCluster => "ingest_cluster",
            IngestAction::IngestCellMetadata => "ingest_cell_metadata",
            IngestAction::IngestExpression => "ingest_expression",
            IngestAction::IngestAnnData => "ingest_anndata",
            IngestAction::DifferentialExpression => "differential_expression",
            IngestAction::ScviTraining => "scvi_training",
            IngestAction::RenderDotPlotGenes => "render_dot_plot_genes",
            IngestAction::ImagePipeline => "image_pipeline",
        }
    }

    /// Parse from the persisted wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest_cluster" => Some(IngestAction::IngestCluster),
            "ingest_cell_metadata" => Some(IngestAction::IngestCellMetadata),
            "ingest_expression" => Some(IngestAction::IngestExpression),
            "ingest_anndata" => Some(IngestAction::IngestAnnData),
            "differential_expression" => Some(IngestAction::DifferentialExpression),
            "scvi_training" => Some(IngestAction::ScviTraining),
            "render_dot_plot_genes" => Some(IngestAction::RenderDotPlotGenes),
            "image_pipeline" => Some(IngestAction::ImagePipeline),
            _ => None,
        }
    }

    /// CLI action flag consumed by the external container, always emitted
    /// first in the options array.
    pub fn cli_flag(&self) -> String {
        format!("--{}", self.as_str().replace('_', "-"))
    }

    /// Whether this action's machine type scales with the input file size.
    pub fn scales_with_file_size(&self) -> bool {
        matches!(
            self,
            IngestAction::IngestAnnData | IngestAction::DifferentialExpression
        )
    }

    /// Whether this action parses its source file. Ingest actions drive the
    /// file's parse lifecycle and are subject to the concurrency gate;
    /// computation actions read already-parsed data and are not.
    pub fn is_ingest(&self) -> bool {
        matches!(
            self,
            IngestAction::IngestCluster
                | IngestAction::IngestCellMetadata
                | IngestAction::IngestExpression
                | IngestAction::IngestAnnData
        )
    }
}

impl std::fmt::Display for IngestAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// STUDY FILES
// =============================================================================

/// Scientific file types the orchestrator reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Cluster,
    Metadata,
    Expression,
    RawCounts,
    AnnData,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Cluster => "cluster",
            FileType::Metadata => "metadata",
            FileType::Expression => "expression",
            FileType::RawCounts => "raw_counts",
            FileType::AnnData => "anndata",
            FileType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "cluster" => FileType::Cluster,
            "metadata" => FileType::Metadata,
            "expression" => FileType::Expression,
            "raw_counts" => FileType::RawCounts,
            "anndata" => FileType::AnnData,
            _ => FileType::Other,
        }
    }

    /// Whether files of this type write derived expression records and must
    /// therefore be serialized against each other by the concurrency gate.
    /// Raw-counts matrices are never queried for visualization and are exempt.
    pub fn gated(&self) -> bool {
        matches!(self, FileType::Expression | FileType::AnnData)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse lifecycle of a study file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    New,
    Uploading,
    Uploaded,
    Parsing,
    Parsed,
    Validated,
    Failed,
}

impl ParseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseStatus::New => "new",
            ParseStatus::Uploading => "uploading",
            ParseStatus::Uploaded => "uploaded",
            ParseStatus::Parsing => "parsing",
            ParseStatus::Parsed => "parsed",
            ParseStatus::Validated => "validated",
            ParseStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "uploading" => ParseStatus::Uploading,
            "uploaded" => ParseStatus::Uploaded,
            "parsing" => ParseStatus::Parsing,
            "parsed" => ParseStatus::Parsed,
            "validated" => ParseStatus::Validated,
            "failed" => ParseStatus::Failed,
            _ => ParseStatus::New,
        }
    }

    /// A file in one of these states has finished writing derived records and
    /// no longer blocks sibling ingests.
    pub fn is_complete(&self) -> bool {
        matches!(self, ParseStatus::Parsed | ParseStatus::Validated)
    }
}

/// Persisted study file record, the unit of ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyFile {
    pub id: Uuid,
    pub study_id: Uuid,
    /// Study accession, e.g. "SCP1234".
    pub study_accession: String,
    pub name: String,
    pub file_type: FileType,
    /// Upload size in bytes.
    pub upload_file_size: i64,
    /// GCS bucket holding the uploaded bytes.
    pub bucket_id: String,
    /// Path within the bucket; defaults to the file name when absent.
    pub remote_location: Option<String>,
    pub parse_status: ParseStatus,
    pub queued_for_deletion: bool,
    /// Reference AnnData files are stored but never parsed into fragments.
    pub is_reference_anndata: bool,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudyFile {
    /// Fully qualified bucket URL passed to the ingest container.
    pub fn bucket_url(&self) -> String {
        let path = self.remote_location.as_deref().unwrap_or(&self.name);
        format!("gs://{}/{}", self.bucket_id, path)
    }

    /// Age of the file relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

// =============================================================================
// JOB RECORDS
// =============================================================================

/// Lifecycle of a submitted compute job, mirroring backend terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "succeeded" => JobStatus::Succeeded,
            "failed" => JobStatus::Failed,
            "aborted" => JobStatus::Aborted,
            _ => JobStatus::Submitted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted
        )
    }
}

/// Durable record of one submitted compute job.
///
/// Created by the submission service; status transitions are written only by
/// the poller. The backend `job_name` is the single source of truth for
/// subsequent polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub job_name: String,
    pub action: IngestAction,
    pub study_id: Uuid,
    pub study_file_id: Uuid,
    /// Email of the submitting user; forwarded as the backend quota user.
    pub requester: String,
    pub machine_type: String,
    pub status: JobStatus,
    /// Idempotence flag for the completion-summary path: analytics and
    /// downstream launches happen at most once per job.
    pub analytics_reported: bool,
    /// Parameter object as submitted, for audit and retry.
    pub params: Option<JsonValue>,
    pub error_message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// ANNOTATIONS
// =============================================================================

/// Where an annotation is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationScope {
    /// Attached to one cluster's coordinates.
    Cluster,
    /// Study-wide cell metadata.
    Study,
}

impl AnnotationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationScope::Cluster => "cluster",
            AnnotationScope::Study => "study",
        }
    }
}

/// Group vs numeric annotation values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    Group,
    Numeric,
}

/// A cell-level annotation, the input to differential-expression eligibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub scope: AnnotationScope,
    pub annotation_type: AnnotationType,
    /// Cluster the annotation belongs to, for cluster-scoped annotations.
    pub cluster_name: Option<String>,
    /// Distinct group values.
    pub values: Vec<String>,
    /// True when the annotation carries ontology labels ("official").
    pub is_ontology_labeled: bool,
}

impl Annotation {
    /// Stable identifier used for deduplication: `name--type--scope`.
    pub fn identifier(&self) -> String {
        let ty = match self.annotation_type {
            AnnotationType::Group => "group",
            AnnotationType::Numeric => "numeric",
        };
        format!("{}--{}--{}", self.name, ty, self.scope.as_str())
    }
}

// =============================================================================
// ANALYTICS
// =============================================================================

/// Flat telemetry projection computed from opaque job metadata on completion.
///
/// Purely derived; emitted as a structured event and then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAnalytics {
    /// Wall-clock duration in milliseconds, first to last status event.
    pub perf_time: i64,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub action: String,
    /// What initiated the job (upload, retry, sync).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk_size_gb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// "success" or "failed".
    pub job_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_genes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_cells: Option<i64>,
    /// AnnData only: logical fragments extracted from the combined file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_fragments: Option<Vec<String>>,
    /// AnnData only: true for non-ingestible reference files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_reference_anndata: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        let actions = [
            IngestAction::IngestCluster,
            IngestAction::IngestCellMetadata,
            IngestAction::IngestExpression,
            IngestAction::IngestAnnData,
            IngestAction::DifferentialExpression,
            IngestAction::ScviTraining,
            IngestAction::RenderDotPlotGenes,
            IngestAction::ImagePipeline,
        ];
        for action in actions {
            assert_eq!(IngestAction::parse(action.as_str()), Some(action));
        }
    }

    #[test]
    fn test_action_parse_unknown() {
        assert_eq!(IngestAction::parse("ingest_subsample"), None);
        assert_eq!(IngestAction::parse(""), None);
    }

    #[test]
    fn test_action_cli_flag() {
        assert_eq!(
            IngestAction::IngestAnnData.cli_flag(),
            "--ingest-anndata"
        );
        assert_eq!(
            IngestAction::DifferentialExpression.cli_flag(),
            "--differential-expression"
        );
        assert_eq!(
            IngestAction::IngestCellMetadata.cli_flag(),
            "--ingest-cell-metadata"
        );
    }

    #[test]
    fn test_action_file_size_scaling() {
        assert!(IngestAction::IngestAnnData.scales_with_file_size());
        assert!(IngestAction::DifferentialExpression.scales_with_file_size());
        assert!(!IngestAction::IngestCluster.scales_with_file_size());
        assert!(!IngestAction::ImagePipeline.scales_with_file_size());
    }

    #[test]
    fn test_file_type_gating() {
        assert!(FileType::Expression.gated());
        assert!(FileType::AnnData.gated());
        assert!(!FileType::RawCounts.gated());
        assert!(!FileType::Cluster.gated());
        assert!(!FileType::Metadata.gated());
    }

    #[test]
    fn test_file_type_parse_fallback() {
        assert_eq!(FileType::parse("expression"), FileType::Expression);
        assert_eq!(FileType::parse("image"), FileType::Other);
    }

    #[test]
    fn test_parse_status_completion() {
        assert!(ParseStatus::Parsed.is_complete());
        assert!(ParseStatus::Validated.is_complete());
        assert!(!ParseStatus::Parsing.is_complete());
        assert!(!ParseStatus::Failed.is_complete());
        assert!(!ParseStatus::New.is_complete());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Aborted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Submitted.is_terminal());
    }

    #[test]
    fn test_bucket_url_with_remote_location() {
        let file = study_file_fixture();
        assert_eq!(
            file.bucket_url(),
            "gs://fc-bucket-1/_scp_internal/anndata/matrix.h5ad"
        );
    }

    #[test]
    fn test_bucket_url_falls_back_to_name() {
        let mut file = study_file_fixture();
        file.remote_location = None;
        assert_eq!(file.bucket_url(), "gs://fc-bucket-1/matrix.h5ad");
    }

    #[test]
    fn test_annotation_identifier() {
        let ann = Annotation {
            name: "cell_type".to_string(),
            scope: AnnotationScope::Study,
            annotation_type: AnnotationType::Group,
            cluster_name: None,
            values: vec!["B cell".to_string(), "T cell".to_string()],
            is_ontology_labeled: true,
        };
        assert_eq!(ann.identifier(), "cell_type--group--study");
    }

    #[test]
    fn test_analytics_serializes_camel_case() {
        let analytics = JobAnalytics {
            perf_time: 60000,
            file_name: "matrix.h5ad".to_string(),
            file_type: "anndata".to_string(),
            file_size: 1_048_576,
            action: "ingest_anndata".to_string(),
            trigger: Some("upload".to_string()),
            machine_type: Some("n2d-highmem-8".to_string()),
            boot_disk_size_gb: Some(300),
            exit_code: None,
            job_status: "success".to_string(),
            error: None,
            num_genes: Some(25000),
            num_cells: Some(4000),
            extracted_fragments: None,
            is_reference_anndata: None,
        };
        let json = serde_json::to_value(&analytics).unwrap();
        assert_eq!(json["perfTime"], 60000);
        assert_eq!(json["jobStatus"], "success");
        assert_eq!(json["machineType"], "n2d-highmem-8");
        assert!(json.get("exitCode").is_none());
    }

    fn study_file_fixture() -> StudyFile {
        StudyFile {
            id: Uuid::new_v4(),
            study_id: Uuid::new_v4(),
            study_accession: "SCP42".to_string(),
            name: "matrix.h5ad".to_string(),
            file_type: FileType::AnnData,
            upload_file_size: 1_048_576,
            bucket_id: "fc-bucket-1".to_string(),
            remote_location: Some("_scp_internal/anndata/matrix.h5ad".to_string()),
            parse_status: ParseStatus::Uploaded,
            queued_for_deletion: false,
            is_reference_anndata: false,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
