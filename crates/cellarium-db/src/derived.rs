//! Derived-data repository: records written by ingest parses.
//!
//! Purges run inside a transaction and are always scoped by compound
//! study + file (+ cluster) filters, so concurrent retries on different
//! files never touch each other's rows.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use cellarium_core::{DerivedDataRepository, Error, Result};

/// PostgreSQL implementation of DerivedDataRepository.
pub struct PgDerivedDataRepository {
    pool: PgPool,
}

impl PgDerivedDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DerivedDataRepository for PgDerivedDataRepository {
    async fn gene_count(&self, study_id: Uuid, file_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM genes WHERE study_id = $1 AND study_file_id = $2",
        )
        .bind(study_id)
        .bind(file_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn cell_count(&self, study_id: Uuid, file_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM study_cells WHERE study_id = $1 AND study_file_id = $2",
        )
        .bind(study_id)
        .bind(file_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count)
    }

    async fn delete_cell_metadata(&self, study_id: Uuid, file_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let arrays = sqlx::query(
            "DELETE FROM data_arrays
             WHERE study_id = $1 AND study_file_id = $2
               AND linear_data_type = 'CellMetadatum'",
        )
        .bind(study_id)
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let metadata = sqlx::query(
            "DELETE FROM cell_metadata WHERE study_id = $1 AND study_file_id = $2",
        )
        .bind(study_id)
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let removed = arrays.rows_affected() + metadata.rows_affected();
        debug!(study_id = %study_id, file_id = %file_id, removed, "Purged cell metadata");
        Ok(removed)
    }

    async fn delete_genes(&self, study_id: Uuid, file_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let arrays = sqlx::query(
            "DELETE FROM data_arrays
             WHERE study_id = $1 AND study_file_id = $2
               AND linear_data_type = 'Gene'",
        )
        .bind(study_id)
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let genes =
            sqlx::query("DELETE FROM genes WHERE study_id = $1 AND study_file_id = $2")
                .bind(study_id)
                .bind(file_id)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let removed = arrays.rows_affected() + genes.rows_affected();
        debug!(study_id = %study_id, file_id = %file_id, removed, "Purged genes");
        Ok(removed)
    }

    async fn delete_cluster(
        &self,
        study_id: Uuid,
        file_id: Uuid,
        cluster_name: &str,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Only the named cluster: sibling clusters from the same study stay.
        let arrays = sqlx::query(
            "DELETE FROM data_arrays
             WHERE study_id = $1 AND study_file_id = $2
               AND linear_data_type = 'ClusterGroup'
               AND cluster_name = $3",
        )
        .bind(study_id)
        .bind(file_id)
        .bind(cluster_name)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let clusters = sqlx::query(
            "DELETE FROM cluster_groups
             WHERE study_id = $1 AND study_file_id = $2 AND name = $3",
        )
        .bind(study_id)
        .bind(file_id)
        .bind(cluster_name)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        let removed = arrays.rows_affected() + clusters.rows_affected();
        debug!(
            study_id = %study_id,
            file_id = %file_id,
            cluster_name,
            removed,
            "Purged cluster group"
        );
        Ok(removed)
    }

    async fn delete_all_fragments(&self, study_id: Uuid, file_id: Uuid) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut removed = 0u64;
        for table in ["data_arrays", "genes", "cell_metadata", "cluster_groups"] {
            let result = sqlx::query(&format!(
                "DELETE FROM {} WHERE study_id = $1 AND study_file_id = $2",
                table
            ))
            .bind(study_id)
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            removed += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Database)?;

        debug!(study_id = %study_id, file_id = %file_id, removed, "Purged all fragments");
        Ok(removed)
    }

    async fn extracted_fragments(&self, study_id: Uuid, file_id: Uuid) -> Result<Vec<String>> {
        let mut fragments = Vec::new();

        let checks = [
            ("cluster", "cluster_groups"),
            ("metadata", "cell_metadata"),
            ("expression", "genes"),
        ];
        for (fragment, table) in checks {
            let present: bool = sqlx::query_scalar(&format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE study_id = $1 AND study_file_id = $2)",
                table
            ))
            .bind(study_id)
            .bind(file_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
            if present {
                fragments.push(fragment.to_string());
            }
        }

        Ok(fragments)
    }
}
