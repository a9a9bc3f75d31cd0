//! Concurrency gate for expression-family ingests.
//!
//! Two files that write derived expression records must not parse into the
//! same study at once. The gate is a soft exclusion: a candidate waits while
//! an older gated sibling is still parsing, but a sibling stuck past the
//! staleness window is presumed abandoned and stops blocking. Nothing is
//! ever cancelled here.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use cellarium_core::{ParseStatus, Result, StudyFile, StudyFileRepository};

/// Why a candidate may not launch yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateBlock {
    pub blocking_file_id: Uuid,
    pub blocking_file_name: String,
}

/// Decide whether `candidate` may launch given its study siblings.
///
/// Blocked iff some sibling:
/// - is of a gated file type (expression or AnnData; raw counts are exempt),
/// - is older than the candidate (newer siblings never block),
/// - has not finished parsing (parsed/validated pass, failed files do not
///   hold the gate),
/// - and is younger than the staleness window.
///
/// Non-gated candidates always pass.
pub fn can_launch_ingest(
    candidate: &StudyFile,
    siblings: &[StudyFile],
    staleness: Duration,
    now: DateTime<Utc>,
) -> std::result::Result<(), GateBlock> {
    if !candidate.file_type.gated() {
        return Ok(());
    }

    for sibling in siblings {
        if !sibling.file_type.gated() {
            continue;
        }
        if sibling.created_at >= candidate.created_at {
            continue;
        }
        if sibling.parse_status.is_complete() || sibling.parse_status == ParseStatus::Failed {
            continue;
        }
        if sibling.age(now) >= staleness {
            debug!(
                file_id = %candidate.id,
                blocking_file_id = %sibling.id,
                "Stale sibling parse ignored by gate"
            );
            continue;
        }
        return Err(GateBlock {
            blocking_file_id: sibling.id,
            blocking_file_name: sibling.name.clone(),
        });
    }

    Ok(())
}

/// Fetch siblings and apply the gate for one candidate file.
pub async fn check_ingest_gate(
    repo: &dyn StudyFileRepository,
    candidate: &StudyFile,
    staleness_hours: i64,
) -> Result<std::result::Result<(), GateBlock>> {
    let siblings = repo.siblings(candidate.study_id, candidate.id).await?;
    let verdict = can_launch_ingest(
        candidate,
        &siblings,
        Duration::hours(staleness_hours),
        Utc::now(),
    );
    if let Err(block) = &verdict {
        debug!(
            file_id = %candidate.id,
            blocking_file_id = %block.blocking_file_id,
            "Ingest gated behind sibling parse"
        );
    }
    Ok(verdict)
}
