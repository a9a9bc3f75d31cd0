//! End-to-end orchestration tests against the mock backend and in-memory
//! repositories: submit, poll to completion, analytics, retries, purges.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use cellarium_batch::mock::{job_snapshot, status_event, succeeded_task, MockComputeBackend};
use cellarium_batch::JobState;
use cellarium_core::{
    Annotation, AnnotationScope, AnnotationType, FileType, IngestAction, JobStatus,
    OrchestratorConfig,
};
use cellarium_jobs::cleanup::{RetryCoordinator, RetryDecision};
use cellarium_jobs::params::{AnnDataParams, JobParams};
use cellarium_jobs::poller::{job_short_id, CompletionHandler, CompletionOutcome};
use cellarium_jobs::submit::JobSubmissionService;

use common::{
    study_file, InMemoryAnnotations, InMemoryDerivedData, InMemoryJobRecords, InMemoryStudyFiles,
};

struct Harness {
    backend: Arc<MockComputeBackend>,
    study_files: Arc<InMemoryStudyFiles>,
    job_records: Arc<InMemoryJobRecords>,
    derived: Arc<InMemoryDerivedData>,
    annotations: Arc<InMemoryAnnotations>,
    submitter: JobSubmissionService,
    completion: CompletionHandler,
}

fn harness() -> Harness {
    let backend = Arc::new(MockComputeBackend::new());
    let study_files = Arc::new(InMemoryStudyFiles::new());
    let job_records = Arc::new(InMemoryJobRecords::new());
    let derived = Arc::new(InMemoryDerivedData::new());
    let annotations = Arc::new(InMemoryAnnotations::new());

    let submitter = JobSubmissionService::new(
        OrchestratorConfig::default(),
        backend.clone(),
        job_records.clone(),
        study_files.clone(),
    );
    let completion = CompletionHandler::new(
        backend.clone(),
        job_records.clone(),
        study_files.clone(),
        derived.clone(),
        annotations.clone(),
    );

    Harness {
        backend,
        study_files,
        job_records,
        derived,
        annotations,
        submitter,
        completion,
    }
}

fn anndata_params(file: &cellarium_core::StudyFile) -> JobParams {
    JobParams::IngestAnnData(AnnDataParams {
        anndata_file: file.bucket_url(),
        obsm_keys: vec!["X_umap".to_string()],
        extract: vec!["cluster".to_string(), "metadata".to_string()],
        file_size: file.upload_file_size,
        ingest_anndata: true,
    })
}

#[tokio::test]
async fn anndata_submission_uses_default_tier_and_action_flag() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);
    h.study_files.insert(file.clone());

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();

    // A 1 MB file stays on the default tier.
    assert_eq!(record.machine_type, "n2d-highmem-8");
    assert_eq!(record.status, JobStatus::Submitted);
    assert_eq!(record.action, IngestAction::IngestAnnData);

    let created = h.backend.created_jobs();
    assert_eq!(created.len(), 1);
    let (_, request, quota_user) = &created[0];
    assert_eq!(quota_user, "user@test.org");

    // Study identity leads the command line, then the action flag.
    let commands = &request.task_groups[0].task_spec.runnables[0]
        .container
        .commands;
    assert_eq!(commands[0], "--study-id");
    assert_eq!(commands[1], file.study_id.to_string());
    assert_eq!(commands[2], "--study-file-id");
    assert_eq!(commands[3], file.id.to_string());
    assert_eq!(commands[4], "--ingest-anndata");
    assert!(commands.contains(&file.bucket_url()));

    // Labels are sanitized study metadata.
    assert_eq!(request.labels["study_accession"], "scp42");
    assert_eq!(request.labels["ingest_action"], "ingest_anndata");
    assert_eq!(request.labels["file_type"], "anndata");
}

#[tokio::test]
async fn successful_job_reports_one_minute_perf_time() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);
    h.study_files.insert(file.clone());
    h.derived.set_counts(file.id, 25_000, 4_000);
    h.derived.add_row(study_id, file.id, "cluster", "UMAP");
    h.derived.add_row(study_id, file.id, "metadata", "meta");

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();

    let short_id = job_short_id(&record.job_name).to_string();
    let start = Utc::now();
    let done = job_snapshot(
        &short_id,
        JobState::Succeeded,
        vec![
            status_event("Job state is set to RUNNING", start),
            status_event(
                "Job state is set to SUCCEEDED",
                start + Duration::seconds(60),
            ),
        ],
    );
    h.backend.script_job(&short_id, vec![done.clone()]);
    h.backend.set_task(&short_id, succeeded_task(&short_id, start));

    let outcome = h.completion.handle_completion(&record, &done).await.unwrap();
    let CompletionOutcome::Succeeded { analytics, .. } = outcome else {
        panic!("expected success outcome");
    };

    assert_eq!(analytics.perf_time, 60_000);
    assert_eq!(analytics.job_status, "success");
    assert_eq!(analytics.exit_code, None);
    assert_eq!(analytics.num_genes, Some(25_000));
    assert_eq!(analytics.num_cells, Some(4_000));
    assert_eq!(
        analytics.extracted_fragments,
        Some(vec!["cluster".to_string(), "metadata".to_string()])
    );
    assert_eq!(analytics.is_reference_anndata, Some(false));

    let stored = h.job_records.get_sync(record.id).unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert!(stored.analytics_reported);
}

#[tokio::test]
async fn completion_is_idempotent() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);
    h.study_files.insert(file.clone());

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();

    let short_id = job_short_id(&record.job_name).to_string();
    let now = Utc::now();
    let done = job_snapshot(
        &short_id,
        JobState::Succeeded,
        vec![status_event("done", now)],
    );
    h.backend.set_task(&short_id, succeeded_task(&short_id, now));

    let first = h.completion.handle_completion(&record, &done).await.unwrap();
    assert!(matches!(first, CompletionOutcome::Succeeded { .. }));

    // Second observer of the same terminal state does nothing.
    let second = h.completion.handle_completion(&record, &done).await.unwrap();
    assert!(matches!(second, CompletionOutcome::AlreadyReported));
}

#[tokio::test]
async fn transient_completion_error_keeps_report_pending() {
    let h = harness();
    let study_id = Uuid::new_v4();
    // Deliberately not inserted yet, so the file lookup fails.
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();

    let short_id = job_short_id(&record.job_name).to_string();
    let now = Utc::now();
    let done = job_snapshot(
        &short_id,
        JobState::Succeeded,
        vec![status_event("done", now)],
    );
    h.backend.set_task(&short_id, succeeded_task(&short_id, now));

    let err = h.completion.handle_completion(&record, &done).await;
    assert!(err.is_err());

    // Nothing flipped: the record is still unreported and non-terminal.
    let stored = h.job_records.get_sync(record.id).unwrap();
    assert!(!stored.analytics_reported);
    assert_eq!(stored.status, JobStatus::Submitted);

    // Once the lookup recovers, the same completion reports normally.
    h.study_files.insert(file.clone());
    let outcome = h.completion.handle_completion(&record, &done).await.unwrap();
    assert!(matches!(outcome, CompletionOutcome::Succeeded { .. }));
    let stored = h.job_records.get_sync(record.id).unwrap();
    assert!(stored.analytics_reported);
    assert_eq!(stored.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn success_plans_de_launches_for_eligible_annotations() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);
    h.study_files.insert(file.clone());
    h.derived.set_counts(file.id, 25_000, 4_000);
    h.annotations.set(
        study_id,
        vec![
            Annotation {
                name: "cell_type".to_string(),
                scope: AnnotationScope::Study,
                annotation_type: AnnotationType::Group,
                cluster_name: None,
                values: vec!["B cell".to_string(), "T cell".to_string()],
                is_ontology_labeled: true,
            },
            // Shadowed custom duplicate of the official annotation.
            Annotation {
                name: "cell_type__custom".to_string(),
                scope: AnnotationScope::Study,
                annotation_type: AnnotationType::Group,
                cluster_name: None,
                values: vec!["B".to_string(), "T".to_string()],
                is_ontology_labeled: false,
            },
            // Numeric annotations never get DE.
            Annotation {
                name: "n_genes".to_string(),
                scope: AnnotationScope::Study,
                annotation_type: AnnotationType::Numeric,
                cluster_name: None,
                values: vec![],
                is_ontology_labeled: false,
            },
        ],
    );

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();

    let short_id = job_short_id(&record.job_name).to_string();
    let now = Utc::now();
    let done = job_snapshot(
        &short_id,
        JobState::Succeeded,
        vec![status_event("done", now)],
    );
    h.backend.set_task(&short_id, succeeded_task(&short_id, now));

    let outcome = h.completion.handle_completion(&record, &done).await.unwrap();
    let CompletionOutcome::Succeeded { de_annotations, .. } = outcome else {
        panic!("expected success outcome");
    };
    assert_eq!(de_annotations.len(), 1);
    assert_eq!(de_annotations[0].name, "cell_type");
}

#[tokio::test]
async fn failed_job_surfaces_error_and_exit_code() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);
    h.study_files.insert(file.clone());

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();

    let short_id = job_short_id(&record.job_name).to_string();
    let start = Utc::now();
    let done = job_snapshot(
        &short_id,
        JobState::Failed,
        vec![
            status_event("Job state is set to RUNNING", start),
            status_event(
                "Job failed: task exited with code 137",
                start + Duration::seconds(30),
            ),
        ],
    );
    h.backend.set_task(
        &short_id,
        cellarium_batch::mock::failed_task(&short_id, 137, start + Duration::seconds(30)),
    );

    let outcome = h.completion.handle_completion(&record, &done).await.unwrap();
    let CompletionOutcome::Failed { analytics } = outcome else {
        panic!("expected failure outcome");
    };
    assert_eq!(analytics.job_status, "failed");
    assert_eq!(analytics.exit_code, Some(137));
    assert!(analytics
        .error
        .as_deref()
        .unwrap()
        .contains("exited with code 137"));
    assert!(analytics.num_genes.is_none());

    let stored = h.job_records.get_sync(record.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
}

#[tokio::test]
async fn cluster_purge_leaves_sibling_clusters() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::Cluster, "UMAP", 1024);
    h.study_files.insert(file.clone());

    h.derived.add_row(study_id, file.id, "cluster", "UMAP");
    let other_file = Uuid::new_v4();
    h.derived.add_row(study_id, other_file, "cluster", "tSNE");
    h.derived.add_row(study_id, file.id, "metadata", "meta");

    let coordinator = RetryCoordinator::new(h.study_files.clone(), h.derived.clone(), 3);
    let removed = coordinator
        .purge_for_action(IngestAction::IngestCluster, &file)
        .await
        .unwrap();

    assert_eq!(removed, 1);
    let remaining = h.derived.rows();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().any(|r| r.name == "tSNE"));
    assert!(remaining.iter().any(|r| r.kind == "metadata"));
}

#[tokio::test]
async fn retry_cap_marks_file_failed() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::Expression, "matrix.txt", 1024);
    h.study_files.insert(file.clone());

    let coordinator = RetryCoordinator::new(h.study_files.clone(), h.derived.clone(), 3);

    for attempt in 1..=3 {
        match coordinator
            .handle_failure(IngestAction::IngestExpression, &file, "parse error")
            .await
            .unwrap()
        {
            RetryDecision::Scheduled { attempt: a, .. } => assert_eq!(a, attempt),
            other => panic!("expected scheduled retry, got {:?}", other),
        }
    }

    // Fourth failure exhausts the budget.
    let decision = coordinator
        .handle_failure(IngestAction::IngestExpression, &file, "parse error")
        .await
        .unwrap();
    assert_eq!(decision, RetryDecision::Exhausted { attempts: 4 });

    let stored = h.study_files.get(file.id).unwrap();
    assert_eq!(stored.parse_status, cellarium_core::ParseStatus::Failed);
    assert_eq!(stored.retry_count, 4);
}

#[tokio::test]
async fn submission_surfaces_backend_error() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);

    h.backend
        .fail_next_create("Quota exceeded (429): RESOURCE_EXHAUSTED");
    let err = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Quota exceeded"));

    // No record persisted for a failed submission.
    assert!(h.job_records.all().is_empty());
}

#[tokio::test]
async fn submission_gated_behind_parsing_sibling() {
    let h = harness();
    let study_id = Uuid::new_v4();

    let mut parsing = study_file(study_id, FileType::Expression, "older.txt", 1024);
    parsing.parse_status = cellarium_core::ParseStatus::Parsing;
    parsing.created_at = Utc::now() - Duration::hours(2);
    h.study_files.insert(parsing.clone());

    let file = study_file(study_id, FileType::AnnData, "matrix.h5ad", 1_048_576);
    h.study_files.insert(file.clone());

    let err = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap_err();
    assert!(matches!(err, cellarium_core::Error::Gated(_)));
    assert!(err.to_string().contains("older.txt"));

    // Nothing reached the backend and nothing was recorded.
    assert!(h.backend.created_jobs().is_empty());
    assert!(h.job_records.all().is_empty());
}

#[tokio::test]
async fn large_anndata_scales_machine_type() {
    let h = harness();
    let study_id = Uuid::new_v4();
    let file = study_file(
        study_id,
        FileType::AnnData,
        "big.h5ad",
        30 * 1024 * 1024 * 1024,
    );
    h.study_files.insert(file.clone());

    let record = h
        .submitter
        .run_job(&file, "user@test.org", &anndata_params(&file))
        .await
        .unwrap();
    assert_eq!(record.machine_type, "n2d-highmem-64");

    let (_, request, _) = &h.backend.created_jobs()[0];
    assert_eq!(
        request.allocation_policy.machine_type(),
        Some("n2d-highmem-64")
    );
}
