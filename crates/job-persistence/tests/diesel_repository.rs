use job_persistence::DieselJobRepository;
use jobflow::{JobKind, JobRecord, JobRepository, JobStatus, PersistResult, PipelineRun, RunState};
use serde_json::json;
use tempfile::TempDir;

fn setup_repo() -> (TempDir, DieselJobRepository) {
    // SQLite en archivo temporal; las migraciones se aplican en `new`.
    let dir = tempfile::tempdir().expect("tempdir");
    let url = dir.path().join("jobflow_test.db").to_string_lossy().to_string();
    let repo = DieselJobRepository::new(&url).expect("repo");
    (dir, repo)
}

fn running_record(job_id: &str) -> JobRecord {
    let mut rec = JobRecord::empty("segment");
    rec.current_job_id = Some(job_id.into());
    rec.job_kind = Some(JobKind::BatchSegment);
    rec.status = Some(JobStatus::Running);
    rec.created_at = Some(chrono::Utc::now());
    rec.params = json!({"itemIds": ["I1", "I2"]});
    rec
}

#[test]
fn record_roundtrip_and_version_increments() {
    if cfg!(feature = "pg") {
        eprintln!("omitido: prueba sólo para SQLite");
        return;
    }
    let (_dir, repo) = setup_repo();
    assert!(repo.get_record("segment").unwrap().is_none());

    let saved = repo.put_record(&running_record("job-1")).expect("put");
    assert_eq!(saved.version, 1);
    let loaded = repo.get_record("segment").unwrap().expect("record");
    assert_eq!(loaded.current_job_id.as_deref(), Some("job-1"));
    assert_eq!(loaded.job_kind, Some(JobKind::BatchSegment));
    assert_eq!(loaded.status, Some(JobStatus::Running));
    assert_eq!(loaded.params["itemIds"], json!(["I1", "I2"]));
    assert!(loaded.completed_at.is_none());

    let mut done = loaded.clone();
    done.status = Some(JobStatus::Failed);
    done.error_message = Some("bad data".into());
    done.completed_at = Some(chrono::Utc::now());
    let saved = repo.put_record(&done).expect("put 2");
    assert_eq!(saved.version, 2);
    let loaded = repo.get_record("segment").unwrap().unwrap();
    assert_eq!(loaded.status, Some(JobStatus::Failed));
    assert_eq!(loaded.error_message.as_deref(), Some("bad data"));
    assert!(loaded.completed_at.is_some());
}

#[test]
fn compare_and_put_detects_stale_versions() {
    if cfg!(feature = "pg") {
        return;
    }
    let (_dir, repo) = setup_repo();
    let rec = running_record("job-1");
    match repo.compare_and_put(&rec, None).unwrap() {
        PersistResult::Ok { new_version } => assert_eq!(new_version, 1),
        PersistResult::Conflict => panic!("conflicto inesperado al crear"),
    }
    // ya existe: crear de nuevo es conflicto
    assert_eq!(repo.compare_and_put(&rec, None).unwrap(), PersistResult::Conflict);
    // versión vieja
    assert_eq!(repo.compare_and_put(&rec, Some(7)).unwrap(), PersistResult::Conflict);
    match repo.compare_and_put(&running_record("job-2"), Some(1)).unwrap() {
        PersistResult::Ok { new_version } => assert_eq!(new_version, 2),
        PersistResult::Conflict => panic!("conflicto inesperado"),
    }
    assert_eq!(repo.get_record("segment").unwrap().unwrap().current_job_id.as_deref(), Some("job-2"));
}

#[test]
fn runs_are_saved_with_optimistic_locking() {
    if cfg!(feature = "pg") {
        return;
    }
    let (_dir, repo) = setup_repo();
    let mut run = PipelineRun::new("segment", vec!["batch-segment".into(), "materialize".into()], json!({"itemIds": ["I1"]}));
    repo.create_run(&run).expect("create");
    assert!(repo.create_run(&run).is_err());

    run.transition(RunState::StepSubmitted { step: 0 }).unwrap();
    match repo.save_run(&run, 0).unwrap() {
        PersistResult::Ok { new_version } => run.version = new_version,
        PersistResult::Conflict => panic!("conflicto inesperado"),
    }
    assert_eq!(repo.save_run(&run, 0).unwrap(), PersistResult::Conflict);

    let loaded = repo.get_run(&run.run_id).expect("get");
    assert_eq!(loaded.state, RunState::StepSubmitted { step: 0 });
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.outputs["input"], json!({"itemIds": ["I1"]}));

    std::thread::sleep(std::time::Duration::from_millis(5));
    let other = PipelineRun::new("segment", vec!["batch-segment".into()], json!({}));
    repo.create_run(&other).unwrap();
    let runs = repo.list_runs("segment").unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run_id, other.run_id);
    assert!(repo.list_runs("otro").unwrap().is_empty());
}

#[test]
fn missing_run_is_not_found() {
    if cfg!(feature = "pg") {
        return;
    }
    let (_dir, repo) = setup_repo();
    let err = repo.get_run(&uuid::Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, jobflow::JobError::NotFound(_)));
}
