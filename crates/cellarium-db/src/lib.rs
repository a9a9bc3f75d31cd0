//! # cellarium-db
//!
//! PostgreSQL database layer for cellarium.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for study files, job records, derived
//!   ingest data, and annotations
//!
//! ## Example
//!
//! ```rust,ignore
//! use cellarium_db::Database;
//! use cellarium_core::StudyFileRepository;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/cellarium").await?;
//!     let file = db.study_files.fetch(file_id).await?;
//!     println!("{} ({})", file.name, file.parse_status);
//!     Ok(())
//! }
//! ```

pub mod annotations;
pub mod derived;
pub mod job_records;
pub mod pool;
pub mod study_files;

// Re-export core types
pub use cellarium_core::*;

pub use annotations::PgAnnotationRepository;
pub use derived::PgDerivedDataRepository;
pub use job_records::PgJobRecordRepository;
pub use pool::{create_pool, PoolConfig};
pub use study_files::PgStudyFileRepository;

/// Aggregate handle to every repository, sharing one connection pool.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Study file metadata repository.
    pub study_files: PgStudyFileRepository,
    /// Durable job record repository.
    pub job_records: PgJobRecordRepository,
    /// Derived ingest data repository (genes, cells, clusters, fragments).
    pub derived: PgDerivedDataRepository,
    /// Annotation repository for differential-expression eligibility.
    pub annotations: PgAnnotationRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            study_files: PgStudyFileRepository::new(pool.clone()),
            job_records: PgJobRecordRepository::new(pool.clone()),
            derived: PgDerivedDataRepository::new(pool.clone()),
            annotations: PgAnnotationRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to PostgreSQL with default pool settings.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = pool::create_pool(database_url, PoolConfig::default()).await?;
        Ok(Self::new(pool))
    }
}
