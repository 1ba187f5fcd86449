//! Flujos concretos y su construcción sobre `PipelineEngine`.
pub mod data_integration;
pub mod launcher;
pub mod segment;

pub use data_integration::data_integration_steps;
pub use launcher::LocalLauncher;
pub use segment::segment_steps;

use crate::clients::Services;
use crate::config::PipelineConfig;
use crate::errors::{Result, WorkflowError};
use crate::workflow_type::WorkflowType;
use jobflow::{JobRepository, PipelineEngine, PipelineEngineConfig};
use std::sync::Arc;

/// Construye el motor del workflow indicado sobre `repo`, con la espera y
/// el modo de envío de la configuración.
pub fn build_engine<R>(workflow: WorkflowType,
                       repo: Arc<R>,
                       services: &Services,
                       config: &PipelineConfig)
                       -> Result<PipelineEngine<R>>
    where R: JobRepository + 'static
{
    let steps = match workflow {
        WorkflowType::DataIntegration => data_integration_steps(services, config)?,
        WorkflowType::Segment => {
            let shared: Arc<dyn JobRepository> = repo.clone();
            segment_steps(services, config, shared)
        }
        WorkflowType::Unknown => return Err(WorkflowError::Validation("workflow desconocido".to_string())),
    };
    Ok(PipelineEngine::new(repo,
                           config.submission_guard(),
                           steps,
                           PipelineEngineConfig { poll: config.poll_config() }))
}
