use jobflow::stubs::InMemoryJobRepository;
use jobflow::{JobError, JobHandle, JobKind, JobRecord, JobRepository, JobService, JobStatus, PersistResult, PipelineRun,
              SubmissionGuard};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use uuid::Uuid;

fn seed(repo: &InMemoryJobRepository, kind: JobKind, status: JobStatus) {
  let mut rec = JobRecord::empty("segment");
  rec.current_job_id = Some("old-job".into());
  rec.job_kind = Some(kind);
  rec.status = Some(status);
  rec.created_at = Some(chrono::Utc::now());
  repo.put_record(&rec).expect("seed");
}

async fn submit_one(service: &JobService<InMemoryJobRepository>, kind: JobKind, id: &str) -> jobflow::Result<JobHandle> {
  let id = id.to_string();
  service.submit("segment", kind, json!({}), move || async move { Ok::<_, JobError>(JobHandle::new(id, kind, json!({"n": 1}))) })
         .await
}

#[tokio::test]
async fn running_record_of_same_kind_rejects_submission() {
  let repo = Arc::new(InMemoryJobRepository::new());
  seed(&repo, JobKind::BatchSegment, JobStatus::Running);
  let service = JobService::new(repo.clone(), SubmissionGuard::Advisory);

  let err = submit_one(&service, JobKind::BatchSegment, "new-job").await.unwrap_err();
  match err {
    JobError::DuplicateInFlightJob { kind, job_id, .. } => {
      assert_eq!(kind, JobKind::BatchSegment);
      assert_eq!(job_id, "old-job");
    }
    other => panic!("esperaba DuplicateInFlightJob, obtuve {:?}", other),
  }
  assert_eq!(repo.get_record("segment").unwrap().unwrap().current_job_id.as_deref(), Some("old-job"));
}

#[tokio::test]
async fn terminal_or_absent_records_allow_submission() {
  for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Cancelled, JobStatus::Timeout] {
    let repo = Arc::new(InMemoryJobRepository::new());
    seed(&repo, JobKind::BatchSegment, status);
    let service = JobService::new(repo.clone(), SubmissionGuard::Advisory);
    let handle = submit_one(&service, JobKind::BatchSegment, "new-job").await.expect("submit");
    assert_eq!(handle.job_id, "new-job");
    let rec = repo.get_record("segment").unwrap().unwrap();
    assert_eq!(rec.status, Some(JobStatus::Running));
    assert_eq!(rec.current_job_id.as_deref(), Some("new-job"));
  }

  let repo = Arc::new(InMemoryJobRepository::new());
  let service = JobService::new(repo, SubmissionGuard::Advisory);
  assert!(submit_one(&service, JobKind::BatchSegment, "first").await.is_ok());
}

#[tokio::test]
async fn job_of_another_kind_in_flight_blocks_the_slot() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let service = JobService::new(repo.clone(), SubmissionGuard::Advisory);
  submit_one(&service, JobKind::Import, "import-a").await.unwrap();

  // otro tipo no puede pisar el slot mientras import-a siga en curso
  match submit_one(&service, JobKind::Resolve, "resolve-b").await.unwrap_err() {
    JobError::DuplicateInFlightJob { kind, job_id, .. } => {
      assert_eq!(kind, JobKind::Import);
      assert_eq!(job_id, "import-a");
    }
    other => panic!("esperaba DuplicateInFlightJob, obtuve {:?}", other),
  }
  assert!(matches!(submit_one(&service, JobKind::Import, "import-c").await,
                   Err(JobError::DuplicateInFlightJob { .. })));

  // el seguimiento de import-a sigue intacto
  let rec = service.record_status("segment", "import-a", JobStatus::Failed, Some("boom".into())).unwrap().unwrap();
  assert_eq!(rec.status, Some(JobStatus::Failed));
  assert_eq!(rec.error_message.as_deref(), Some("boom"));

  // con el slot libre ya se admite cualquier tipo
  assert_eq!(submit_one(&service, JobKind::Resolve, "resolve-b").await.unwrap().job_id, "resolve-b");
}

#[tokio::test]
async fn pending_reservation_of_another_kind_blocks_the_slot() {
  let repo = Arc::new(InMemoryJobRepository::new());
  seed(&repo, JobKind::Import, JobStatus::Pending);
  let service = JobService::new(repo, SubmissionGuard::Conditional);
  assert!(matches!(submit_one(&service, JobKind::BatchSegment, "seg").await,
                   Err(JobError::DuplicateInFlightJob { kind: JobKind::Import, .. })));
}

#[tokio::test]
async fn advisory_race_is_bounded_by_concurrent_submitters() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let service = JobService::new(repo.clone(), SubmissionGuard::Advisory);
  let barrier = Barrier::new(2);
  let external_jobs = AtomicU32::new(0);

  let racer = |id: &'static str| {
    let barrier = &barrier;
    let external_jobs = &external_jobs;
    let service = &service;
    async move {
      service.submit("segment", JobKind::BatchSegment, json!({}), move || async move {
               // ambos pasaron la verificación antes de que alguno escriba
               barrier.wait().await;
               external_jobs.fetch_add(1, Ordering::SeqCst);
               Ok::<_, JobError>(JobHandle::new(id, JobKind::BatchSegment, json!({})))
             })
             .await
    }
  };

  let (a, b) = tokio::join!(racer("job-a"), racer("job-b"));
  assert!(a.is_ok() && b.is_ok());
  assert_eq!(external_jobs.load(Ordering::SeqCst), 2);

  // la carrera no se extiende: un tercer envío ya ve el registro RUNNING
  let third = submit_one(&service, JobKind::BatchSegment, "job-c").await;
  assert!(matches!(third, Err(JobError::DuplicateInFlightJob { .. })));
}

/// Repositorio que devuelve una lectura vieja (sin registro) la primera vez,
/// como si la lectura ocurriera antes de la escritura de otro proceso.
struct StaleFirstRead {
  inner: InMemoryJobRepository,
  stale: AtomicBool,
}

impl JobRepository for StaleFirstRead {
  fn get_record(&self, pipeline_id: &str) -> jobflow::Result<Option<JobRecord>> {
    if self.stale.swap(false, Ordering::SeqCst) {
      return Ok(None);
    }
    self.inner.get_record(pipeline_id)
  }
  fn put_record(&self, record: &JobRecord) -> jobflow::Result<JobRecord> {
    self.inner.put_record(record)
  }
  fn compare_and_put(&self, record: &JobRecord, expected_version: Option<i64>) -> jobflow::Result<PersistResult> {
    self.inner.compare_and_put(record, expected_version)
  }
  fn create_run(&self, run: &PipelineRun) -> jobflow::Result<()> {
    self.inner.create_run(run)
  }
  fn get_run(&self, run_id: &Uuid) -> jobflow::Result<PipelineRun> {
    self.inner.get_run(run_id)
  }
  fn save_run(&self, run: &PipelineRun, expected_version: i64) -> jobflow::Result<PersistResult> {
    self.inner.save_run(run, expected_version)
  }
  fn list_runs(&self, pipeline_id: &str) -> jobflow::Result<Vec<PipelineRun>> {
    self.inner.list_runs(pipeline_id)
  }
}

#[tokio::test]
async fn conditional_guard_loses_race_without_external_submit() {
  let repo = Arc::new(StaleFirstRead { inner: InMemoryJobRepository::new(), stale: AtomicBool::new(false) });
  let winner = JobService::new(repo.clone(), SubmissionGuard::Conditional);
  winner.submit("segment", JobKind::BatchSegment, json!({}), || async {
          Ok::<_, JobError>(JobHandle::new("job-a", JobKind::BatchSegment, json!({})))
        })
        .await
        .expect("winner");

  // el segundo lee un estado viejo y pasa la verificación; la reserva CAS falla
  repo.stale.store(true, Ordering::SeqCst);
  let external = AtomicU32::new(0);
  let counter = &external;
  let loser = JobService::new(repo.clone(), SubmissionGuard::Conditional);
  let res = loser.submit("segment", JobKind::BatchSegment, json!({}), move || async move {
                   counter.fetch_add(1, Ordering::SeqCst);
                   Ok::<_, JobError>(JobHandle::new("job-b", JobKind::BatchSegment, json!({})))
                 })
                 .await;
  assert!(matches!(res, Err(JobError::DuplicateInFlightJob { .. })), "{:?}", res);
  assert_eq!(external.load(Ordering::SeqCst), 0);
  let rec = repo.get_record("segment").unwrap().unwrap();
  assert_eq!(rec.current_job_id.as_deref(), Some("job-a"));
  assert_eq!(rec.status, Some(JobStatus::Running));
}

#[tokio::test]
async fn conditional_guard_releases_reservation_on_submit_error() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let service = JobService::new(repo.clone(), SubmissionGuard::Conditional);
  let res = service.submit("segment", JobKind::BatchSegment, json!({"ids": ["I1"]}), || async {
                     Err::<JobHandle, _>(JobError::Other("servicio caído".into()))
                   })
                   .await;
  assert!(res.is_err());
  let rec = repo.get_record("segment").unwrap().unwrap();
  assert_eq!(rec.status, Some(JobStatus::Failed));
  assert!(rec.error_message.unwrap().contains("servicio caído"));

  assert!(submit_one(&service, JobKind::BatchSegment, "retry").await.is_ok());
}

#[tokio::test]
async fn record_status_ignores_superseded_jobs() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let service = JobService::new(repo.clone(), SubmissionGuard::Advisory);
  submit_one(&service, JobKind::BatchSegment, "job-a").await.unwrap();

  assert!(service.record_status("segment", "otro", JobStatus::Failed, None).unwrap().is_none());
  let rec = service.record_status("segment", "job-a", JobStatus::Succeeded, None).unwrap().unwrap();
  assert_eq!(rec.status, Some(JobStatus::Succeeded));
  assert!(rec.completed_at.is_some());
}
