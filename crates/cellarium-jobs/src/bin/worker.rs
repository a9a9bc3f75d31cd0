//! Orchestrator worker binary.
//!
//! Wires the PostgreSQL repositories, the batch client, and the task-queue
//! worker together, resumes polling for unfinished jobs, and runs until
//! interrupted.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cellarium_batch::BatchClient;
use cellarium_core::OrchestratorConfig;
use cellarium_db::{
    create_pool, PgAnnotationRepository, PgDerivedDataRepository, PgJobRecordRepository,
    PgStudyFileRepository, PoolConfig,
};
use cellarium_jobs::worker::{OrchestratorWorker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = OrchestratorConfig::from_env();
    let worker_config = WorkerConfig::from_env();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url, PoolConfig::default()).await?;

    let backend = Arc::new(BatchClient::new(&config));
    let worker = OrchestratorWorker::new(
        worker_config,
        config,
        backend,
        Arc::new(PgStudyFileRepository::new(pool.clone())),
        Arc::new(PgJobRecordRepository::new(pool.clone())),
        Arc::new(PgDerivedDataRepository::new(pool.clone())),
        Arc::new(PgAnnotationRepository::new(pool)),
    );

    worker.recover_unfinished().await?;
    let handle = worker.start();

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    handle.shutdown().await?;

    Ok(())
}
