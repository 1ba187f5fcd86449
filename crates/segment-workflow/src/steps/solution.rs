// solution.rs
//! Paso 4: crear una solución nueva tras podar las antiguas del dataset
//! group (se conservan las `keep` más recientes).
use super::{fetch_error, TRAIN_SOLUTION};
use crate::clients::{list_solutions, RecommendationService};
use crate::errors::Result;
use crate::status::recommendation_snapshot;
use async_trait::async_trait;
use chrono::Utc;
use jobflow::{JobHandle, JobKind, PipelineStep, RunContext, StatusSnapshot, StepSubmission};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;

/// Borra todas las soluciones salvo las `keep` más recientes. Los fallos de
/// borrado se registran y no interrumpen la poda. Devuelve cuántas se
/// borraron.
pub async fn prune_solutions(service: &dyn RecommendationService, dataset_group_arn: &str, keep: usize) -> Result<usize> {
    let existing = list_solutions(service, dataset_group_arn).await?;
    info!("{} soluciones existentes en {}", existing.len(), dataset_group_arn);
    let mut deleted = 0;
    for s in existing.iter().skip(keep) {
        match service.delete_solution(&s.arn).await {
            Ok(()) => {
                info!("solución {} ({}) borrada", s.name, s.arn);
                deleted += 1;
            }
            Err(e) => warn!("no se pudo borrar la solución {}: {}", s.name, e),
        }
    }
    Ok(deleted)
}

pub struct TrainSolutionStep {
    service: Arc<dyn RecommendationService>,
    dataset_group_arn: String,
    recipe_arn: String,
    keep: usize,
}

impl TrainSolutionStep {
    pub fn new(service: Arc<dyn RecommendationService>,
               dataset_group_arn: impl Into<String>,
               recipe_arn: impl Into<String>,
               keep: usize)
               -> Self {
        Self { service, dataset_group_arn: dataset_group_arn.into(), recipe_arn: recipe_arn.into(), keep }
    }
}

#[async_trait]
impl PipelineStep for TrainSolutionStep {
    fn name(&self) -> &str {
        TRAIN_SOLUTION
    }

    fn kind(&self) -> Option<JobKind> {
        Some(JobKind::TrainSolution)
    }

    async fn submit(&self, _ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        let pruned = prune_solutions(self.service.as_ref(), &self.dataset_group_arn, self.keep).await?;
        let timestamp = Utc::now().timestamp();
        let name = format!("item-affinity-solution-{}", timestamp);
        let params = json!({ "name": name,
                             "datasetGroupArn": self.dataset_group_arn,
                             "recipeArn": self.recipe_arn,
                             "timestamp": timestamp,
                             "pruned": pruned });
        let arn = self.service.create_job(JobKind::TrainSolution, &params).await?;
        info!("solución {} creada: {}", name, arn);
        Ok(StepSubmission::Job(JobHandle::new(arn, JobKind::TrainSolution, params)))
    }

    async fn fetch_status(&self, job: &JobHandle) -> jobflow::Result<StatusSnapshot> {
        let st = self.service.describe_job(JobKind::TrainSolution, &job.job_id).await.map_err(fetch_error)?;
        Ok(recommendation_snapshot(&st))
    }
}
