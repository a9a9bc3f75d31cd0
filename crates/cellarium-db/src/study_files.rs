//! Study file repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use cellarium_core::{
    Error, FileType, ParseStatus, Result, StudyFile, StudyFileRepository,
};

const STUDY_FILE_COLUMNS: &str =
    "id, study_id, study_accession, name, file_type, upload_file_size, bucket_id, \
     remote_location, parse_status, queued_for_deletion, is_reference_anndata, \
     retry_count, created_at, updated_at";

/// PostgreSQL implementation of StudyFileRepository.
pub struct PgStudyFileRepository {
    pool: PgPool,
}

impl PgStudyFileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> StudyFile {
        StudyFile {
            id: row.get("id"),
            study_id: row.get("study_id"),
            study_accession: row.get("study_accession"),
            name: row.get("name"),
            file_type: FileType::parse(row.get("file_type")),
            upload_file_size: row.get("upload_file_size"),
            bucket_id: row.get("bucket_id"),
            remote_location: row.get("remote_location"),
            parse_status: ParseStatus::parse(row.get("parse_status")),
            queued_for_deletion: row.get("queued_for_deletion"),
            is_reference_anndata: row.get("is_reference_anndata"),
            retry_count: row.get("retry_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl StudyFileRepository for PgStudyFileRepository {
    async fn fetch(&self, id: Uuid) -> Result<StudyFile> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM study_files WHERE id = $1",
            STUDY_FILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row)
            .ok_or(Error::StudyFileNotFound(id))
    }

    async fn siblings(&self, study_id: Uuid, exclude: Uuid) -> Result<Vec<StudyFile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM study_files
             WHERE study_id = $1 AND id <> $2 AND NOT queued_for_deletion
             ORDER BY created_at ASC",
            STUDY_FILE_COLUMNS
        ))
        .bind(study_id)
        .bind(exclude)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn update_parse_status(&self, id: Uuid, status: ParseStatus) -> Result<()> {
        debug!(file_id = %id, status = status.as_str(), "Updating parse status");
        sqlx::query(
            "UPDATE study_files SET parse_status = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn increment_retry(&self, id: Uuid) -> Result<i32> {
        let count: i32 = sqlx::query_scalar(
            "UPDATE study_files
             SET retry_count = retry_count + 1, updated_at = $1
             WHERE id = $2
             RETURNING retry_count",
        )
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE study_files
             SET parse_status = 'failed', failure_reason = $1, updated_at = $2
             WHERE id = $3",
        )
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
