// import.rs
//! Paso 3: unir el historial de compras con el cliente integrado mediante
//! una consulta y crear el job de importación con su resultado.
use super::{fetch_error, IMPORT};
use crate::clients::RecommendationService;
use crate::query::QueryRunner;
use crate::status::recommendation_snapshot;
use async_trait::async_trait;
use jobflow::{JobHandle, JobKind, PipelineStep, RunContext, StatusSnapshot, StepSubmission};
use log::info;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Interacciones usuario/ítem de la marca principal y de la submarca. Los
/// ítems de la submarca llevan el prefijo `sub_` para no colisionar.
pub fn purchase_history_sql(database: &str) -> String {
    format!("SELECT ic.MatchID AS USER_ID, ph.item_id AS ITEM_ID, ph.purchase_date AS TIMESTAMP \
             FROM {db}.purchase_history ph \
             JOIN {db}.integrated_customer ic ON ph.customer_id = ic.RecordId \
             UNION ALL \
             SELECT ic.MatchID AS USER_ID, CONCAT('sub_', sph.item_id) AS ITEM_ID, sph.purchase_date AS TIMESTAMP \
             FROM {db}.subbrand_purchase_history sph \
             JOIN {db}.integrated_customer ic ON sph.customer_id = ic.RecordId",
            db = database)
}

pub struct ImportStep {
    query: QueryRunner,
    service: Arc<dyn RecommendationService>,
    database: String,
    output_bucket: String,
    dataset_arn: String,
    role_arn: String,
}

impl ImportStep {
    pub fn new(query: QueryRunner,
               service: Arc<dyn RecommendationService>,
               database: impl Into<String>,
               output_bucket: impl Into<String>,
               dataset_arn: impl Into<String>,
               role_arn: impl Into<String>)
               -> Self {
        Self { query,
               service,
               database: database.into(),
               output_bucket: output_bucket.into(),
               dataset_arn: dataset_arn.into(),
               role_arn: role_arn.into() }
    }
}

#[async_trait]
impl PipelineStep for ImportStep {
    fn name(&self) -> &str {
        IMPORT
    }

    fn kind(&self) -> Option<JobKind> {
        Some(JobKind::Import)
    }

    async fn submit(&self, _ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        let job_name = Uuid::new_v4().to_string();
        let output_location = format!("s3://{}/athena-results/{}/", self.output_bucket, job_name);
        let exec = self.query
                       .run(&purchase_history_sql(&self.database), &self.database, &output_location)
                       .await?;
        info!("resultados de la consulta de importación en {}", exec.result_location);

        let params = json!({ "jobName": job_name,
                             "datasetArn": self.dataset_arn,
                             "dataLocation": exec.result_location,
                             "roleArn": self.role_arn,
                             "queryExecutionId": exec.execution_id });
        let arn = self.service.create_job(JobKind::Import, &params).await?;
        info!("job de importación {} creado: {}", job_name, arn);
        Ok(StepSubmission::Job(JobHandle::new(arn, JobKind::Import, params)))
    }

    async fn fetch_status(&self, job: &JobHandle) -> jobflow::Result<StatusSnapshot> {
        let st = self.service.describe_job(JobKind::Import, &job.job_id).await.map_err(fetch_error)?;
        Ok(recommendation_snapshot(&st))
    }
}
