// segment.rs
//! Paso 6: crear el job de segmentos por ítem.
//!
//! Los ítems son los pedidos en la entrada del run o, si no hay, todos los
//! de `item_master`. La entrada del job se escribe como JSON lines
//! `{"itemId": ..}` bajo `<prefix>input/` y la salida queda bajo
//! `<prefix>output/<jobName>/`.
use super::{fetch_error, BATCH_SEGMENT, TRAIN_SOLUTION_VERSION};
use crate::clients::RecommendationService;
use crate::errors::{Result, WorkflowError};
use crate::query::{parse_s3_uri, s3_uri, QueryRunner};
use crate::status::recommendation_snapshot;
use crate::workflow_type::WorkflowType;
use async_trait::async_trait;
use jobflow::{JobError, JobHandle, JobKind, JobRepository, JobStatus, ObjectStore, PipelineStep, RunContext, StatusSnapshot,
              StepSubmission};
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Entrada aceptada por el paso (ambos campos opcionales).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInput {
    #[serde(default)]
    pub item_ids: Vec<String>,
    pub solution_version_arn: Option<String>,
}

/// De dónde sale la versión de solución cuando la entrada no la trae.
#[derive(Clone)]
pub enum SolutionVersionSource {
    /// Salida del paso `train-solution-version` del mismo run.
    PreviousStep,
    /// Última versión entrenada por el flujo de integración.
    Latest(Arc<dyn JobRepository>),
}

/// Última versión de solución entrenada con éxito por el flujo de
/// integración: primero el registro "latest", luego los runs.
pub fn latest_solution_version(repo: &dyn JobRepository) -> jobflow::Result<Option<String>> {
    let pipeline = WorkflowType::DataIntegration.pipeline_id();
    if let Some(rec) = repo.get_record(pipeline)? {
        if rec.job_kind == Some(JobKind::TrainSolutionVersion) && rec.status == Some(JobStatus::Succeeded) {
            return Ok(rec.current_job_id);
        }
    }
    for run in repo.list_runs(pipeline)? {
        let found = run.outputs
                       .get(TRAIN_SOLUTION_VERSION)
                       .and_then(|o| o.get("jobId"))
                       .and_then(|v| v.as_str());
        if let Some(arn) = found {
            return Ok(Some(arn.to_string()));
        }
    }
    Ok(None)
}

/// Ids de ítem (primera columna) de un CSV de resultados con cabecera.
pub fn parse_item_ids(body: &[u8]) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(body);
    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| WorkflowError::Validation(format!("CSV de resultados inválido: {}", e)))?;
        match record.get(0).map(str::trim) {
            Some(id) if !id.is_empty() => ids.push(id.to_string()),
            _ => {}
        }
    }
    Ok(ids)
}

pub struct BatchSegmentStep {
    query: QueryRunner,
    service: Arc<dyn RecommendationService>,
    store: Arc<dyn ObjectStore>,
    database: String,
    /// Bucket de resultados de consultas.
    output_bucket: String,
    segment_bucket: String,
    segment_prefix: String,
    role_arn: String,
    users_per_segment: u32,
    solution_version: SolutionVersionSource,
}

impl BatchSegmentStep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(query: QueryRunner,
               service: Arc<dyn RecommendationService>,
               store: Arc<dyn ObjectStore>,
               database: impl Into<String>,
               output_bucket: impl Into<String>,
               segment_bucket: impl Into<String>,
               segment_prefix: impl Into<String>,
               role_arn: impl Into<String>,
               users_per_segment: u32,
               solution_version: SolutionVersionSource)
               -> Self {
        Self { query,
               service,
               store,
               database: database.into(),
               output_bucket: output_bucket.into(),
               segment_bucket: segment_bucket.into(),
               segment_prefix: segment_prefix.into(),
               role_arn: role_arn.into(),
               users_per_segment,
               solution_version }
    }

    fn resolve_solution_version(&self, ctx: &RunContext, input: &SegmentInput) -> jobflow::Result<String> {
        if let Some(arn) = &input.solution_version_arn {
            return Ok(arn.clone());
        }
        match &self.solution_version {
            SolutionVersionSource::PreviousStep => {
                let out: serde_json::Value = ctx.require_output(TRAIN_SOLUTION_VERSION)?;
                out.get("jobId")
                   .and_then(|v| v.as_str())
                   .map(str::to_string)
                   .ok_or_else(|| JobError::MissingParameter(format!("jobId en la salida de {}", TRAIN_SOLUTION_VERSION)))
            }
            SolutionVersionSource::Latest(repo) => latest_solution_version(repo.as_ref())?
                .ok_or_else(|| JobError::MissingParameter("solutionVersionArn (no hay versiones entrenadas)".to_string())),
        }
    }

    async fn all_item_ids(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT item_id FROM {}.item_master", self.database);
        let output_location = format!("s3://{}/athena-results/{}/", self.output_bucket, Uuid::new_v4());
        let exec = self.query.run(&sql, &self.database, &output_location).await?;
        let (bucket, key) = parse_s3_uri(&exec.result_location)?;
        let body = self.store.get(&bucket, &key).await?;
        parse_item_ids(&body)
    }
}

#[async_trait]
impl PipelineStep for BatchSegmentStep {
    fn name(&self) -> &str {
        BATCH_SEGMENT
    }

    fn kind(&self) -> Option<JobKind> {
        Some(JobKind::BatchSegment)
    }

    async fn submit(&self, ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        let input: SegmentInput = ctx.input()?;
        let solution_version_arn = self.resolve_solution_version(ctx, &input)?;
        let requested = !input.item_ids.is_empty();
        let item_ids = if requested { input.item_ids.clone() } else { self.all_item_ids().await? };
        if item_ids.is_empty() {
            return Err(JobError::NoData("no hay ítems para segmentar".to_string()));
        }
        info!("{} ítems para el job de segmentos", item_ids.len());

        let job_name = Uuid::new_v4().to_string();
        let mut lines = Vec::with_capacity(item_ids.len());
        for id in &item_ids {
            lines.push(serde_json::to_string(&json!({ "itemId": id }))?);
        }
        let input_key = format!("{}input/{}.json", self.segment_prefix, job_name);
        self.store
            .put(&self.segment_bucket, &input_key, lines.join("\n").into_bytes(), "application/json")
            .await?;
        let input_path = s3_uri(&self.segment_bucket, &input_key);
        let output_path = s3_uri(&self.segment_bucket, &format!("{}output/{}/", self.segment_prefix, job_name));

        let mut params = json!({ "jobName": job_name,
                                 "solutionVersionArn": solution_version_arn,
                                 "numResults": self.users_per_segment,
                                 "inputPath": input_path,
                                 "outputPath": output_path,
                                 "roleArn": self.role_arn,
                                 "itemCount": item_ids.len() });
        if requested {
            params["itemIds"] = json!(item_ids);
        }
        let arn = self.service.create_job(JobKind::BatchSegment, &params).await?;
        info!("job de segmentos {} creado: {}", job_name, arn);
        Ok(StepSubmission::Job(JobHandle::new(arn, JobKind::BatchSegment, params)))
    }

    async fn fetch_status(&self, job: &JobHandle) -> jobflow::Result<StatusSnapshot> {
        let st = self.service.describe_job(JobKind::BatchSegment, &job.job_id).await.map_err(fetch_error)?;
        Ok(recommendation_snapshot(&st))
    }
}
