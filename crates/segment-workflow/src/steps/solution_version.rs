// solution_version.rs
//! Paso 5: entrenar una versión de la solución creada en el paso 4.
use super::{fetch_error, TRAIN_SOLUTION, TRAIN_SOLUTION_VERSION};
use crate::clients::RecommendationService;
use crate::status::recommendation_snapshot;
use async_trait::async_trait;
use jobflow::{JobHandle, JobKind, PipelineStep, RunContext, StatusSnapshot, StepSubmission};
use log::info;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolutionOutput {
    job_id: String,
}

pub struct TrainSolutionVersionStep {
    service: Arc<dyn RecommendationService>,
}

impl TrainSolutionVersionStep {
    pub fn new(service: Arc<dyn RecommendationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl PipelineStep for TrainSolutionVersionStep {
    fn name(&self) -> &str {
        TRAIN_SOLUTION_VERSION
    }

    fn kind(&self) -> Option<JobKind> {
        Some(JobKind::TrainSolutionVersion)
    }

    async fn submit(&self, ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        let solution: SolutionOutput = ctx.require_output(TRAIN_SOLUTION)?;
        let params = json!({ "solutionArn": solution.job_id });
        let arn = self.service.create_job(JobKind::TrainSolutionVersion, &params).await?;
        info!("versión {} creada para {}", arn, solution.job_id);
        Ok(StepSubmission::Job(JobHandle::new(arn, JobKind::TrainSolutionVersion, params)))
    }

    async fn fetch_status(&self, job: &JobHandle) -> jobflow::Result<StatusSnapshot> {
        let st = self.service
                     .describe_job(JobKind::TrainSolutionVersion, &job.job_id)
                     .await
                     .map_err(fetch_error)?;
        Ok(recommendation_snapshot(&st))
    }
}
