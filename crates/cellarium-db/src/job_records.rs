//! Job record repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cellarium_core::{
    Error, IngestAction, JobRecord, JobRecordRepository, JobStatus, Result,
};

const JOB_RECORD_COLUMNS: &str =
    "id, job_name, action, study_id, study_file_id, requester, machine_type, status, \
     analytics_reported, params, error_message, submitted_at, completed_at";

/// PostgreSQL implementation of JobRecordRepository.
pub struct PgJobRecordRepository {
    pool: PgPool,
}

impl PgJobRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: sqlx::postgres::PgRow) -> Result<JobRecord> {
        let action: String = row.get("action");
        let action = IngestAction::parse(&action)
            .ok_or_else(|| Error::Internal(format!("Unknown ingest action: {}", action)))?;
        Ok(JobRecord {
            id: row.get("id"),
            job_name: row.get("job_name"),
            action,
            study_id: row.get("study_id"),
            study_file_id: row.get("study_file_id"),
            requester: row.get("requester"),
            machine_type: row.get("machine_type"),
            status: JobStatus::parse(row.get("status")),
            analytics_reported: row.get("analytics_reported"),
            params: row.get("params"),
            error_message: row.get("error_message"),
            submitted_at: row.get("submitted_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl JobRecordRepository for PgJobRecordRepository {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_records
             (id, job_name, action, study_id, study_file_id, requester, machine_type,
              status, analytics_reported, params, error_message, submitted_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(record.id)
        .bind(&record.job_name)
        .bind(record.action.as_str())
        .bind(record.study_id)
        .bind(record.study_file_id)
        .bind(&record.requester)
        .bind(&record.machine_type)
        .bind(record.status.as_str())
        .bind(record.analytics_reported)
        .bind(&record.params)
        .bind(&record.error_message)
        .bind(record.submitted_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job_records WHERE id = $1",
            JOB_RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn get_by_name(&self, job_name: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM job_records WHERE job_name = $1",
            JOB_RECORD_COLUMNS
        ))
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_row).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let completed_at = status.is_terminal().then(Utc::now);
        sqlx::query(
            "UPDATE job_records
             SET status = $1, error_message = COALESCE($2, error_message),
                 completed_at = COALESCE($3, completed_at)
             WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn try_mark_analytics_reported(&self, id: Uuid) -> Result<bool> {
        // Atomic flip prevents a double report when two pollers observe the
        // same terminal state.
        let flipped: Option<Uuid> = sqlx::query_scalar(
            "UPDATE job_records
             SET analytics_reported = TRUE
             WHERE id = $1 AND NOT analytics_reported
             RETURNING id",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(flipped.is_some())
    }

    async fn list_unfinished(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM job_records
             WHERE status IN ('submitted', 'running')
             ORDER BY submitted_at ASC",
            JOB_RECORD_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_row).collect()
    }
}
