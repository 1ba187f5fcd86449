// resolve.rs
//! Paso 1: iniciar el job de matching de resolución de entidades.
use super::{fetch_error, RESOLVE};
use crate::clients::EntityResolutionService;
use crate::status::entity_resolution_snapshot;
use async_trait::async_trait;
use jobflow::{JobHandle, JobKind, PipelineStep, RunContext, StatusSnapshot, StepSubmission};
use log::info;
use serde_json::json;
use std::sync::Arc;

pub struct ResolveStep {
    service: Arc<dyn EntityResolutionService>,
    workflow_name: String,
}

impl ResolveStep {
    pub fn new(service: Arc<dyn EntityResolutionService>, workflow_name: impl Into<String>) -> Self {
        Self { service, workflow_name: workflow_name.into() }
    }
}

#[async_trait]
impl PipelineStep for ResolveStep {
    fn name(&self) -> &str {
        RESOLVE
    }

    fn kind(&self) -> Option<JobKind> {
        Some(JobKind::Resolve)
    }

    async fn submit(&self, _ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        info!("iniciando matching del workflow {}", self.workflow_name);
        let job_id = self.service.start_job(&self.workflow_name).await?;
        info!("job de matching iniciado: {}", job_id);
        Ok(StepSubmission::Job(JobHandle::new(job_id, JobKind::Resolve, json!({ "workflowName": self.workflow_name }))))
    }

    async fn fetch_status(&self, job: &JobHandle) -> jobflow::Result<StatusSnapshot> {
        let workflow = job.param_str("workflowName")?;
        let st = self.service.get_job(workflow, &job.job_id).await.map_err(fetch_error)?;
        Ok(entity_resolution_snapshot(&st))
    }
}
