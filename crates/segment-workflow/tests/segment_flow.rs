mod common;

use chrono::Utc;
use common::{Harness, SEGMENT_BUCKET, TARGET_BUCKET};
use jobflow::stubs::InMemoryJobRepository;
use jobflow::{JobError, JobKind, JobRecord, JobRepository, JobStatus, PersistResult, PipelineRun, RunState};
use segment_workflow::steps::latest_solution_version;
use segment_workflow::stubs::{FakeEntityResolution, FakeRecommendationService, RecordingLauncher};
use segment_workflow::{build_engine, LocalLauncher, SegmentTool, WorkflowType};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const OLD_ARTIFACT: &str = "item_based_segment/segment_results_20240101000000.csv";

fn trained_version(repo: &InMemoryJobRepository, arn: &str) {
  let mut rec = JobRecord::empty("data-integration");
  rec.current_job_id = Some(arn.to_string());
  rec.job_kind = Some(JobKind::TrainSolutionVersion);
  rec.status = Some(JobStatus::Succeeded);
  rec.created_at = Some(Utc::now());
  rec.completed_at = Some(Utc::now());
  repo.put_record(&rec).unwrap();
}

fn segment_record(repo: &InMemoryJobRepository, status: JobStatus, error: Option<&str>) {
  let mut rec = JobRecord::empty("segment");
  rec.current_job_id = Some("arn:fake:batch-segment/99".to_string());
  rec.job_kind = Some(JobKind::BatchSegment);
  rec.status = Some(status);
  rec.created_at = Some(Utc::now());
  rec.params = json!({ "itemIds": ["I1", "I2"] });
  rec.error_message = error.map(str::to_string);
  if status.is_terminal() {
    rec.completed_at = Some(Utc::now());
  }
  repo.put_record(&rec).unwrap();
}

#[test]
fn latest_solution_version_prefers_the_record_then_runs() {
  let repo = InMemoryJobRepository::new();
  assert_eq!(latest_solution_version(&repo).unwrap(), None);

  let mut run = PipelineRun::new("data-integration", vec!["train-solution-version".to_string()], json!({}));
  run.outputs.insert("train-solution-version".to_string(), json!({ "jobId": "arn:sv/from-run" }));
  repo.create_run(&run).unwrap();
  assert_eq!(latest_solution_version(&repo).unwrap().as_deref(), Some("arn:sv/from-run"));

  trained_version(&repo, "arn:sv/from-record");
  assert_eq!(latest_solution_version(&repo).unwrap().as_deref(), Some("arn:sv/from-record"));
}

#[tokio::test(start_paused = true)]
async fn requested_items_are_segmented_with_the_latest_version() {
  let h = Harness::new(&["U1", "U2"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = build_engine(WorkflowType::Segment, repo.clone(), &h.services, &h.config).unwrap();

  let run = engine.start_run("segment", json!({ "itemIds": ["I7"] })).unwrap();
  let done = engine.run_to_completion(&run.run_id).await.unwrap();

  assert_eq!(done.state, RunState::Succeeded);
  let created = h.recommendation.created();
  assert_eq!(created.len(), 1);
  let params = &created[0].1;
  assert_eq!(params["solutionVersionArn"], json!("arn:sv/7"));
  assert_eq!(params["itemIds"], json!(["I7"]));
  let input_key = params["inputPath"].as_str().unwrap().trim_start_matches("s3://seg/").to_string();
  assert_eq!(h.body(SEGMENT_BUCKET, &input_key), r#"{"itemId":"I7"}"#);
  // Los ids pedidos no consultan el maestro.
  assert!(h.query.submitted_sql().is_empty());

  let artifacts = h.artifacts();
  assert_eq!(artifacts.len(), 1);
  assert_eq!(h.body(TARGET_BUCKET, &artifacts[0]), "item_id,user_id\nI7,U1\nI7,U2\n");

  let record = repo.get_record("segment").unwrap().unwrap();
  assert_eq!(record.status, Some(JobStatus::Succeeded));
  assert_eq!(record.params["itemIds"], json!(["I7"]));
  // El registro de integración no se toca.
  let integration = repo.get_record("data-integration").unwrap().unwrap();
  assert_eq!(integration.current_job_id.as_deref(), Some("arn:sv/7"));
}

#[tokio::test(start_paused = true)]
async fn explicit_solution_version_wins() {
  let h = Harness::new(&["U1"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = build_engine(WorkflowType::Segment, repo, &h.services, &h.config).unwrap();

  let run = engine.start_run("segment", json!({ "itemIds": ["I1"], "solutionVersionArn": "arn:sv/manual" }))
                  .unwrap();
  engine.run_to_completion(&run.run_id).await.unwrap();

  assert_eq!(h.recommendation.created()[0].1["solutionVersionArn"], json!("arn:sv/manual"));
}

#[tokio::test(start_paused = true)]
async fn segment_without_trained_version_fails_before_creating_a_job() {
  let h = Harness::new(&["U1"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  let engine = build_engine(WorkflowType::Segment, repo.clone(), &h.services, &h.config).unwrap();

  let run = engine.start_run("segment", json!({ "itemIds": ["I1"] })).unwrap();
  let err = engine.run_to_completion(&run.run_id).await.unwrap_err();

  assert!(matches!(err, JobError::MissingParameter(_)));
  assert!(matches!(engine.load_run(&run.run_id).unwrap().state, RunState::Failed { step: 0, .. }));
  assert!(h.recommendation.created().is_empty());
  assert!(repo.get_record("segment").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_segment_output_keeps_the_previous_artifact() {
  // Sin salida configurada el job termina pero no escribe archivos.
  let h = Harness::new(&["U1"]);
  let mut services = h.services.clone();
  services.recommendation = Arc::new(FakeRecommendationService::new());
  h.store.insert(TARGET_BUCKET, OLD_ARTIFACT, "item_id,user_id\nX,Y\n");
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = build_engine(WorkflowType::Segment, repo.clone(), &services, &h.config).unwrap();

  let run = engine.start_run("segment", json!({ "itemIds": ["I1"] })).unwrap();
  let err = engine.run_to_completion(&run.run_id).await.unwrap_err();

  assert!(matches!(err, JobError::NoData(_)));
  assert!(matches!(engine.load_run(&run.run_id).unwrap().state, RunState::Failed { step: 1, .. }));
  assert_eq!(h.artifacts(), vec![OLD_ARTIFACT.to_string()]);
  assert_eq!(h.body(TARGET_BUCKET, OLD_ARTIFACT), "item_id,user_id\nX,Y\n");
  // El job de segmentos en sí terminó bien.
  assert_eq!(repo.get_record("segment").unwrap().unwrap().status, Some(JobStatus::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn undecodable_output_lines_are_skipped_not_fatal() {
  let h = Harness::new(&["U1"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = build_engine(WorkflowType::Segment, repo, &h.services, &h.config).unwrap();

  let run = engine.start_run("segment", json!({ "itemIds": ["I1"] })).unwrap();
  let submitted = engine.submit_current(&run.run_id).await.unwrap();
  let output_path = submitted.jobs[0].as_ref().unwrap().params["outputPath"].as_str().unwrap().to_string();
  let prefix = output_path.trim_start_matches(&format!("s3://{}/", SEGMENT_BUCKET)).to_string();
  let mut extra = br#"{"input":{"itemId":"I9"},"output":{"usersList":["U9"]}}"#.to_vec();
  extra.extend_from_slice(b"\n{\"input\":{\"itemId\":\"\xff\"}}\n");
  h.store.insert(SEGMENT_BUCKET, &format!("{}extra.json.out", prefix), extra);

  let done = engine.run_to_completion(&run.run_id).await.unwrap();

  assert_eq!(done.state, RunState::Succeeded);
  let report = &done.outputs["materialize-segment"];
  assert_eq!(report["rows"], json!(2));
  assert_eq!(report["skipped"], json!(1));
  let body = h.body(TARGET_BUCKET, &h.artifacts()[0]);
  assert!(body.contains("I1,U1") && body.contains("I9,U9"), "{}", body);
}

#[tokio::test(start_paused = true)]
async fn items_default_to_the_whole_item_master() {
  let h = Harness::new(&["U1"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = build_engine(WorkflowType::Segment, repo, &h.services, &h.config).unwrap();

  let run = engine.start_run("segment", json!({})).unwrap();
  engine.run_to_completion(&run.run_id).await.unwrap();

  let params = &h.recommendation.created()[0].1;
  assert_eq!(params["itemCount"], json!(2));
  assert!(params.get("itemIds").is_none());
  assert_eq!(h.body(TARGET_BUCKET, &h.artifacts()[0]), "item_id,user_id\nI1,U1\nI2,U1\n");
}

#[tokio::test]
async fn tool_rejects_empty_requests_and_running_segments() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let launcher = Arc::new(RecordingLauncher::new());
  let tool = SegmentTool::new(repo.clone(), launcher.clone());

  assert_eq!(tool.start_item_segment(&[]).await, "Error: no se indicaron ids de ítem");

  segment_record(&repo, JobStatus::Running, None);
  let msg = tool.start_item_segment(&["I3".to_string()]).await;
  assert!(msg.starts_with("Error: ya hay un job de segmentos en curso"), "{}", msg);
  assert!(msg.contains("[I1, I2]"));
  assert!(launcher.calls().is_empty());
}

#[tokio::test]
async fn tool_launches_the_segment_workflow() {
  let repo = Arc::new(InMemoryJobRepository::new());
  // Un job anterior terminado no bloquea.
  segment_record(&repo, JobStatus::Failed, Some("boom"));
  let launcher = Arc::new(RecordingLauncher::new());
  let tool = SegmentTool::new(repo, launcher.clone());

  let msg = tool.start_item_segment(&["I3".to_string(), "I4".to_string()]).await;

  assert!(msg.contains("se inició correctamente (ejecución exec-1)"), "{}", msg);
  assert_eq!(launcher.calls(), vec![("segment".to_string(), json!({ "itemIds": ["I3", "I4"] }))]);
}

#[test]
fn status_messages_follow_the_record() {
  let repo = Arc::new(InMemoryJobRepository::new());
  let tool = SegmentTool::new(repo.clone(), Arc::new(RecordingLauncher::new()));
  assert_eq!(tool.check_segment_status(), "Todavía no se creó ningún job de segmentos");

  segment_record(&repo, JobStatus::Running, None);
  let msg = tool.check_segment_status();
  assert!(msg.starts_with("El job de segmentos está en curso"), "{}", msg);
  assert!(msg.ends_with("Ítems: [I1, I2]"));

  segment_record(&repo, JobStatus::Failed, Some("cuota excedida"));
  assert_eq!(tool.check_segment_status(), "El job de segmentos falló (FAILED): cuota excedida");

  segment_record(&repo, JobStatus::Cancelled, None);
  assert_eq!(tool.check_segment_status(), "El job de segmentos falló (CANCELLED): Error desconocido");

  segment_record(&repo, JobStatus::Succeeded, None);
  assert!(tool.check_segment_status().starts_with("El job de segmentos terminó correctamente"));
}

/// Repositorio cuyo listado de runs falla; el resto delega.
struct RunsUnavailable {
  inner: InMemoryJobRepository,
}

impl JobRepository for RunsUnavailable {
  fn get_record(&self, pipeline_id: &str) -> jobflow::Result<Option<JobRecord>> {
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
  fn list_runs(&self, _pipeline_id: &str) -> jobflow::Result<Vec<PipelineRun>> {
    Err(JobError::Other("base de datos no disponible".into()))
  }
}

#[test]
fn unreadable_runs_leave_the_materialization_state_unknown() {
  let repo = Arc::new(RunsUnavailable { inner: InMemoryJobRepository::new() });
  segment_record(&repo.inner, JobStatus::Succeeded, None);
  let tool = SegmentTool::new(repo, Arc::new(RecordingLauncher::new()));

  let status = tool.check_segment_status();
  assert!(status.contains("no se pudo determinar el estado de la materialización"), "{}", status);
  assert!(status.contains("base de datos no disponible"));
  assert!(!status.contains("terminó correctamente"));
}

#[tokio::test(start_paused = true)]
async fn launched_segment_reports_completion() {
  let h = Harness::new(&["U1"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = Arc::new(build_engine(WorkflowType::Segment, repo.clone(), &h.services, &h.config).unwrap());
  let launcher = LocalLauncher::new().with_engine(WorkflowType::Segment, engine).wait_for_completion(true);
  let tool = SegmentTool::new(repo.clone(), Arc::new(launcher));

  let msg = tool.start_item_segment(&["I7".to_string(), "I8".to_string()]).await;
  assert!(msg.contains("se inició correctamente"), "{}", msg);

  let status = tool.check_segment_status();
  assert!(status.starts_with("El job de segmentos terminó correctamente"), "{}", status);
  assert!(status.contains("Ítems: [I7, I8]"));
  assert_eq!(h.artifacts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_materialization_is_reported_after_the_job_succeeds() {
  let h = Harness::build(&["U1"], FakeEntityResolution::default());
  let mut services = h.services.clone();
  services.recommendation = Arc::new(FakeRecommendationService::new());
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = Arc::new(build_engine(WorkflowType::Segment, repo.clone(), &services, &h.config).unwrap());
  let launcher = LocalLauncher::new().with_engine(WorkflowType::Segment, engine).wait_for_completion(true);
  let tool = SegmentTool::new(repo.clone(), Arc::new(launcher));

  tool.start_item_segment(&["I7".to_string()]).await;

  let status = tool.check_segment_status();
  assert!(status.contains("pero la materialización falló"), "{}", status);
  assert!(status.contains("Sin datos"));
}

#[tokio::test(start_paused = true)]
async fn background_launch_marks_the_job_running_before_returning() {
  let h = Harness::new(&["U1"]);
  let repo = Arc::new(InMemoryJobRepository::new());
  trained_version(&repo, "arn:sv/7");
  let engine = Arc::new(build_engine(WorkflowType::Segment, repo.clone(), &h.services, &h.config).unwrap());
  let launcher = LocalLauncher::new().with_engine(WorkflowType::Segment, engine.clone());
  let tool = SegmentTool::new(repo.clone(), Arc::new(launcher));

  tool.start_item_segment(&["I7".to_string()]).await;
  assert!(tool.check_segment_status().starts_with("El job de segmentos está en curso"));
  let again = tool.start_item_segment(&["I8".to_string()]).await;
  assert!(again.starts_with("Error: ya hay un job de segmentos en curso"), "{}", again);

  for _ in 0..60 {
    if engine.runs("segment").unwrap().iter().all(|r| r.state == RunState::Succeeded) {
      break;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
  }
  assert_eq!(engine.runs("segment").unwrap().len(), 1);
  assert!(tool.check_segment_status().starts_with("El job de segmentos terminó correctamente"));
}
