//! In-memory repository fakes for orchestration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use cellarium_core::{
    Annotation, AnnotationRepository, DerivedDataRepository, Error, FileType, JobRecord,
    JobRecordRepository, JobStatus, ParseStatus, Result, StudyFile, StudyFileRepository,
};

#[derive(Default)]
pub struct InMemoryStudyFiles {
    files: Mutex<HashMap<Uuid, StudyFile>>,
}

impl InMemoryStudyFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file: StudyFile) {
        self.files.lock().unwrap().insert(file.id, file);
    }

    pub fn get(&self, id: Uuid) -> Option<StudyFile> {
        self.files.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl StudyFileRepository for InMemoryStudyFiles {
    async fn fetch(&self, id: Uuid) -> Result<StudyFile> {
        self.get(id).ok_or(Error::StudyFileNotFound(id))
    }

    async fn siblings(&self, study_id: Uuid, exclude: Uuid) -> Result<Vec<StudyFile>> {
        let files = self.files.lock().unwrap();
        let mut siblings: Vec<StudyFile> = files
            .values()
            .filter(|f| f.study_id == study_id && f.id != exclude && !f.queued_for_deletion)
            .cloned()
            .collect();
        siblings.sort_by_key(|f| f.created_at);
        Ok(siblings)
    }

    async fn update_parse_status(&self, id: Uuid, status: ParseStatus) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&id).ok_or(Error::StudyFileNotFound(id))?;
        file.parse_status = status;
        file.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry(&self, id: Uuid) -> Result<i32> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&id).ok_or(Error::StudyFileNotFound(id))?;
        file.retry_count += 1;
        Ok(file.retry_count)
    }

    async fn mark_failed(&self, id: Uuid, _reason: &str) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        let file = files.get_mut(&id).ok_or(Error::StudyFileNotFound(id))?;
        file.parse_status = ParseStatus::Failed;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryJobRecords {
    records: Mutex<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<JobRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }

    pub fn get_sync(&self, id: Uuid) -> Option<JobRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl JobRecordRepository for InMemoryJobRecords {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        Ok(self.get_sync(id))
    }

    async fn get_by_name(&self, job_name: &str) -> Result<Option<JobRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.job_name == job_name)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        record.status = status;
        if let Some(message) = error_message {
            record.error_message = Some(message.to_string());
        }
        if status.is_terminal() && record.completed_at.is_none() {
            record.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn try_mark_analytics_reported(&self, id: Uuid) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;
        if record.analytics_reported {
            Ok(false)
        } else {
            record.analytics_reported = true;
            Ok(true)
        }
    }

    async fn list_unfinished(&self) -> Result<Vec<JobRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect())
    }
}

/// One derived row, tagged by fragment kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRow {
    pub study_id: Uuid,
    pub file_id: Uuid,
    pub kind: &'static str,
    pub name: String,
}

#[derive(Default)]
pub struct InMemoryDerivedData {
    rows: Mutex<Vec<DerivedRow>>,
    gene_count: Mutex<HashMap<Uuid, i64>>,
    cell_count: Mutex<HashMap<Uuid, i64>>,
}

impl InMemoryDerivedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&self, study_id: Uuid, file_id: Uuid, kind: &'static str, name: &str) {
        self.rows.lock().unwrap().push(DerivedRow {
            study_id,
            file_id,
            kind,
            name: name.to_string(),
        });
    }

    pub fn set_counts(&self, file_id: Uuid, genes: i64, cells: i64) {
        self.gene_count.lock().unwrap().insert(file_id, genes);
        self.cell_count.lock().unwrap().insert(file_id, cells);
    }

    pub fn rows(&self) -> Vec<DerivedRow> {
        self.rows.lock().unwrap().clone()
    }

    fn drain(&self, pred: impl Fn(&DerivedRow) -> bool) -> u64 {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !pred(r));
        (before - rows.len()) as u64
    }
}

#[async_trait]
impl DerivedDataRepository for InMemoryDerivedData {
    async fn gene_count(&self, _study_id: Uuid, file_id: Uuid) -> Result<i64> {
        Ok(*self.gene_count.lock().unwrap().get(&file_id).unwrap_or(&0))
    }

    async fn cell_count(&self, _study_id: Uuid, file_id: Uuid) -> Result<i64> {
        Ok(*self.cell_count.lock().unwrap().get(&file_id).unwrap_or(&0))
    }

    async fn delete_cell_metadata(&self, study_id: Uuid, file_id: Uuid) -> Result<u64> {
        Ok(self.drain(|r| r.study_id == study_id && r.file_id == file_id && r.kind == "metadata"))
    }

    async fn delete_genes(&self, study_id: Uuid, file_id: Uuid) -> Result<u64> {
        Ok(self.drain(|r| {
            r.study_id == study_id && r.file_id == file_id && r.kind == "expression"
        }))
    }

    async fn delete_cluster(
        &self,
        study_id: Uuid,
        file_id: Uuid,
        cluster_name: &str,
    ) -> Result<u64> {
        Ok(self.drain(|r| {
            r.study_id == study_id
                && r.file_id == file_id
                && r.kind == "cluster"
                && r.name == cluster_name
        }))
    }

    async fn delete_all_fragments(&self, study_id: Uuid, file_id: Uuid) -> Result<u64> {
        Ok(self.drain(|r| r.study_id == study_id && r.file_id == file_id))
    }

    async fn extracted_fragments(&self, study_id: Uuid, file_id: Uuid) -> Result<Vec<String>> {
        let rows = self.rows.lock().unwrap();
        let mut kinds: Vec<String> = rows
            .iter()
            .filter(|r| r.study_id == study_id && r.file_id == file_id)
            .map(|r| r.kind.to_string())
            .collect();
        kinds.sort();
        kinds.dedup();
        Ok(kinds)
    }
}

#[derive(Default)]
pub struct InMemoryAnnotations {
    annotations: Mutex<HashMap<Uuid, Vec<Annotation>>>,
}

impl InMemoryAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, study_id: Uuid, annotations: Vec<Annotation>) {
        self.annotations
            .lock()
            .unwrap()
            .insert(study_id, annotations);
    }
}

#[async_trait]
impl AnnotationRepository for InMemoryAnnotations {
    async fn annotations_for_study(&self, study_id: Uuid) -> Result<Vec<Annotation>> {
        Ok(self
            .annotations
            .lock()
            .unwrap()
            .get(&study_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// A study file fixture with sensible defaults.
pub fn study_file(study_id: Uuid, file_type: FileType, name: &str, size: i64) -> StudyFile {
    StudyFile {
        id: Uuid::new_v4(),
        study_id,
        study_accession: "SCP42".to_string(),
        name: name.to_string(),
        file_type,
        upload_file_size: size,
        bucket_id: "fc-bucket-1".to_string(),
        remote_location: None,
        parse_status: ParseStatus::Uploaded,
        queued_for_deletion: false,
        is_reference_anndata: false,
        retry_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
