//! Command-line parameter builders for ingest containers.
//!
//! Every action has one parameter struct. `ToOptionsArray` renders the
//! container command array; `Validate` reports every bad field at once so a
//! submitter sees the whole picture in a single round trip.

use serde::{Deserialize, Serialize};

use cellarium_core::models::IngestAction;

use crate::machine;

/// Render a struct into the container command array.
///
/// Flags are kebab-case (`--cluster-file value`), booleans are bare flags
/// emitted only when true, `None` and blank strings are omitted entirely.
pub trait ToOptionsArray {
    fn to_options_array(&self) -> Vec<String>;
}

/// Field-level validation that collects every error instead of stopping at
/// the first.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// One invalid field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All validation failures for one parameter struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Ok when no errors were collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl From<ValidationErrors> for cellarium_core::Error {
    fn from(errors: ValidationErrors) -> Self {
        cellarium_core::Error::Validation(errors.to_string())
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn flag(name: &str) -> String {
    format!("--{}", name.replace('_', "-"))
}

fn push_value(args: &mut Vec<String>, name: &str, value: &str) {
    if !is_blank(value) {
        args.push(flag(name));
        args.push(value.to_string());
    }
}

fn push_opt(args: &mut Vec<String>, name: &str, value: Option<&str>) {
    if let Some(v) = value {
        push_value(args, name, v);
    }
}

fn push_bool(args: &mut Vec<String>, name: &str, set: bool) {
    if set {
        args.push(flag(name));
    }
}

fn require(errors: &mut ValidationErrors, field: &str, value: &str) {
    if is_blank(value) {
        errors.push(field, "must not be blank");
    }
}

// =============================================================================
// PER-ACTION PARAMETERS
// =============================================================================

/// Cluster coordinate file ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Bucket URL of the cluster file.
    pub cluster_file: String,
    /// Display name of the cluster.
    pub name: String,
    /// Optional axis domain ranges, serialized JSON.
    pub domain_ranges: Option<String>,
}

impl ToOptionsArray for ClusterParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "cluster_file", &self.cluster_file);
        push_value(&mut args, "name", &self.name);
        push_opt(&mut args, "domain_ranges", self.domain_ranges.as_deref());
        args
    }
}

impl Validate for ClusterParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "cluster_file", &self.cluster_file);
        require(&mut errors, "name", &self.name);
        errors.into_result()
    }
}

/// Cell metadata file ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellMetadataParams {
    pub cell_metadata_file: String,
    pub study_accession: String,
    /// Validate against the metadata convention schema.
    pub validate_convention: bool,
}

impl ToOptionsArray for CellMetadataParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "cell_metadata_file", &self.cell_metadata_file);
        push_value(&mut args, "study_accession", &self.study_accession);
        push_bool(&mut args, "validate_convention", self.validate_convention);
        args
    }
}

impl Validate for CellMetadataParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "cell_metadata_file", &self.cell_metadata_file);
        require(&mut errors, "study_accession", &self.study_accession);
        errors.into_result()
    }
}

/// Dense vs sparse matrix layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixFileType {
    Dense,
    Mtx,
}

impl MatrixFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatrixFileType::Dense => "dense",
            MatrixFileType::Mtx => "mtx",
        }
    }
}

/// Expression matrix ingest. Sparse (mtx) matrices carry companion gene and
/// barcode files; dense matrices must not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionParams {
    pub matrix_file: String,
    pub matrix_file_type: MatrixFileType,
    pub gene_file: Option<String>,
    pub barcode_file: Option<String>,
    /// NCBI taxon of the matrix, when known.
    pub taxon_name: Option<String>,
}

impl ToOptionsArray for ExpressionParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "matrix_file", &self.matrix_file);
        push_value(&mut args, "matrix_file_type", self.matrix_file_type.as_str());
        push_opt(&mut args, "gene_file", self.gene_file.as_deref());
        push_opt(&mut args, "barcode_file", self.barcode_file.as_deref());
        push_opt(&mut args, "taxon_name", self.taxon_name.as_deref());
        args
    }
}

impl Validate for ExpressionParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "matrix_file", &self.matrix_file);
        match self.matrix_file_type {
            MatrixFileType::Mtx => {
                if self.gene_file.as_deref().map_or(true, is_blank) {
                    errors.push("gene_file", "required for mtx matrices");
                }
                if self.barcode_file.as_deref().map_or(true, is_blank) {
                    errors.push("barcode_file", "required for mtx matrices");
                }
            }
            MatrixFileType::Dense => {
                if self.gene_file.is_some() {
                    errors.push("gene_file", "not allowed for dense matrices");
                }
                if self.barcode_file.is_some() {
                    errors.push("barcode_file", "not allowed for dense matrices");
                }
            }
        }
        errors.into_result()
    }
}

/// Combined AnnData file ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnDataParams {
    pub anndata_file: String,
    /// obsm keys holding cluster embeddings, e.g. `X_umap`.
    pub obsm_keys: Vec<String>,
    /// Fragment kinds to extract: `cluster`, `metadata`, `processed_expression`.
    pub extract: Vec<String>,
    /// Upload size in bytes; drives machine-type scaling.
    pub file_size: i64,
    /// Reference files are stored without fragment extraction.
    pub ingest_anndata: bool,
}

impl ToOptionsArray for AnnDataParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "anndata_file", &self.anndata_file);
        if !self.obsm_keys.is_empty() {
            push_value(&mut args, "obsm_keys", &self.obsm_keys.join(";"));
        }
        if !self.extract.is_empty() {
            push_value(&mut args, "extract", &self.extract.join(";"));
        }
        args
    }
}

impl Validate for AnnDataParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "anndata_file", &self.anndata_file);
        if self.file_size < 0 {
            errors.push("file_size", "must be non-negative");
        }
        if self.ingest_anndata && self.extract.is_empty() {
            errors.push("extract", "at least one fragment kind required for ingest");
        }
        errors.into_result()
    }
}

/// One-vs-rest vs pairwise comparison mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeType {
    Rest,
    Pairwise,
}

impl DeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeType::Rest => "rest",
            DeType::Pairwise => "pairwise",
        }
    }
}

/// Differential expression computation over one annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialExpressionParams {
    pub annotation_name: String,
    /// `cluster` or `study`.
    pub annotation_scope: String,
    pub annotation_type: String,
    pub cluster_name: String,
    pub cluster_file: String,
    pub matrix_file_path: String,
    pub matrix_file_type: MatrixFileType,
    /// Matrix upload size in bytes; drives machine-type scaling.
    pub matrix_file_size: i64,
    pub gene_file: Option<String>,
    pub barcode_file: Option<String>,
    pub de_type: DeType,
    /// First comparison group, pairwise only.
    pub group1: Option<String>,
    /// Second comparison group, pairwise only.
    pub group2: Option<String>,
}

impl ToOptionsArray for DifferentialExpressionParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "annotation_name", &self.annotation_name);
        push_value(&mut args, "annotation_scope", &self.annotation_scope);
        push_value(&mut args, "annotation_type", &self.annotation_type);
        push_value(&mut args, "cluster_name", &self.cluster_name);
        push_value(&mut args, "cluster_file", &self.cluster_file);
        push_value(&mut args, "matrix_file_path", &self.matrix_file_path);
        push_value(&mut args, "matrix_file_type", self.matrix_file_type.as_str());
        push_opt(&mut args, "gene_file", self.gene_file.as_deref());
        push_opt(&mut args, "barcode_file", self.barcode_file.as_deref());
        push_value(&mut args, "de_type", self.de_type.as_str());
        push_opt(&mut args, "group1", self.group1.as_deref());
        push_opt(&mut args, "group2", self.group2.as_deref());
        args
    }
}

impl Validate for DifferentialExpressionParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "annotation_name", &self.annotation_name);
        require(&mut errors, "cluster_name", &self.cluster_name);
        require(&mut errors, "cluster_file", &self.cluster_file);
        require(&mut errors, "matrix_file_path", &self.matrix_file_path);
        if self.matrix_file_size < 0 {
            errors.push("matrix_file_size", "must be non-negative");
        }
        if !matches!(self.annotation_scope.as_str(), "cluster" | "study") {
            errors.push("annotation_scope", "must be 'cluster' or 'study'");
        }
        if self.matrix_file_type == MatrixFileType::Mtx {
            if self.gene_file.as_deref().map_or(true, is_blank) {
                errors.push("gene_file", "required for mtx matrices");
            }
            if self.barcode_file.as_deref().map_or(true, is_blank) {
                errors.push("barcode_file", "required for mtx matrices");
            }
        }
        if self.de_type == DeType::Pairwise {
            if self.group1.as_deref().map_or(true, is_blank) {
                errors.push("group1", "required for pairwise comparisons");
            }
            if self.group2.as_deref().map_or(true, is_blank) {
                errors.push("group2", "required for pairwise comparisons");
            }
        }
        errors.into_result()
    }
}

/// scVI model training over an AnnData file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScviParams {
    pub anndata_file: String,
    pub num_epochs: Option<i32>,
}

impl ToOptionsArray for ScviParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "anndata_file", &self.anndata_file);
        if let Some(epochs) = self.num_epochs {
            push_value(&mut args, "num_epochs", &epochs.to_string());
        }
        args
    }
}

impl Validate for ScviParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "anndata_file", &self.anndata_file);
        if let Some(epochs) = self.num_epochs {
            if epochs <= 0 {
                errors.push("num_epochs", "must be positive");
            }
        }
        errors.into_result()
    }
}

/// Precomputed dot plot rendering for a gene list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotPlotGeneParams {
    pub cluster_file: String,
    pub cell_metadata_file: String,
    pub matrix_file_path: String,
    pub genes: Vec<String>,
}

impl ToOptionsArray for DotPlotGeneParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "cluster_file", &self.cluster_file);
        push_value(&mut args, "cell_metadata_file", &self.cell_metadata_file);
        push_value(&mut args, "matrix_file_path", &self.matrix_file_path);
        if !self.genes.is_empty() {
            push_value(&mut args, "genes", &self.genes.join(","));
        }
        args
    }
}

impl Validate for DotPlotGeneParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "cluster_file", &self.cluster_file);
        require(&mut errors, "matrix_file_path", &self.matrix_file_path);
        if self.genes.is_empty() {
            errors.push("genes", "at least one gene required");
        }
        errors.into_result()
    }
}

/// Image preprocessing pipeline for uploaded microscopy images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePipelineParams {
    pub image_file: String,
    pub study_accession: String,
    /// Output bucket path for derived tiles.
    pub output_path: Option<String>,
}

impl ToOptionsArray for ImagePipelineParams {
    fn to_options_array(&self) -> Vec<String> {
        let mut args = Vec::new();
        push_value(&mut args, "image_file", &self.image_file);
        push_value(&mut args, "study_accession", &self.study_accession);
        push_opt(&mut args, "output_path", self.output_path.as_deref());
        args
    }
}

impl Validate for ImagePipelineParams {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        require(&mut errors, "image_file", &self.image_file);
        require(&mut errors, "study_accession", &self.study_accession);
        errors.into_result()
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parameter object for one job submission, tagged by action.
///
/// Serialized as-is into the job record for audit and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobParams {
    IngestCluster(ClusterParams),
    IngestCellMetadata(CellMetadataParams),
    IngestExpression(ExpressionParams),
    #[serde(rename = "ingest_anndata")]
    IngestAnnData(AnnDataParams),
    DifferentialExpression(DifferentialExpressionParams),
    ScviTraining(ScviParams),
    RenderDotPlotGenes(DotPlotGeneParams),
    ImagePipeline(ImagePipelineParams),
}

impl JobParams {
    pub fn action(&self) -> IngestAction {
        match self {
            JobParams::IngestCluster(_) => IngestAction::IngestCluster,
            JobParams::IngestCellMetadata(_) => IngestAction::IngestCellMetadata,
            JobParams::IngestExpression(_) => IngestAction::IngestExpression,
            JobParams::IngestAnnData(_) => IngestAction::IngestAnnData,
            JobParams::DifferentialExpression(_) => IngestAction::DifferentialExpression,
            JobParams::ScviTraining(_) => IngestAction::ScviTraining,
            JobParams::RenderDotPlotGenes(_) => IngestAction::RenderDotPlotGenes,
            JobParams::ImagePipeline(_) => IngestAction::ImagePipeline,
        }
    }

    /// Full container command array: the action flag first, then the
    /// variant's options.
    pub fn to_options_array(&self) -> Vec<String> {
        let mut args = vec![self.action().cli_flag()];
        let inner = match self {
            JobParams::IngestCluster(p) => p.to_options_array(),
            JobParams::IngestCellMetadata(p) => p.to_options_array(),
            JobParams::IngestExpression(p) => p.to_options_array(),
            JobParams::IngestAnnData(p) => p.to_options_array(),
            JobParams::DifferentialExpression(p) => p.to_options_array(),
            JobParams::ScviTraining(p) => p.to_options_array(),
            JobParams::RenderDotPlotGenes(p) => p.to_options_array(),
            JobParams::ImagePipeline(p) => p.to_options_array(),
        };
        args.extend(inner);
        args
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            JobParams::IngestCluster(p) => p.validate(),
            JobParams::IngestCellMetadata(p) => p.validate(),
            JobParams::IngestExpression(p) => p.validate(),
            JobParams::IngestAnnData(p) => p.validate(),
            JobParams::DifferentialExpression(p) => p.validate(),
            JobParams::ScviTraining(p) => p.validate(),
            JobParams::RenderDotPlotGenes(p) => p.validate(),
            JobParams::ImagePipeline(p) => p.validate(),
        }
    }

    /// Machine type requested for this submission: file-size scaled for
    /// actions that grow with input, the default tier otherwise.
    pub fn machine_type(&self, max_machine_type: &str) -> String {
        match self.file_size_hint() {
            Some(size) if self.action().scales_with_file_size() => {
                machine::machine_for_file_size(size, max_machine_type)
            }
            _ => cellarium_core::defaults::DEFAULT_MACHINE_TYPE.to_string(),
        }
    }

    /// Input size in bytes for the actions that track one.
    fn file_size_hint(&self) -> Option<i64> {
        match self {
            JobParams::IngestAnnData(p) => Some(p.file_size),
            JobParams::DifferentialExpression(p) => Some(p.matrix_file_size),
            _ => None,
        }
    }
}
