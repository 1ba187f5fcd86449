// launcher.rs
//
// Lanzador en proceso: cada ejecución es un run del motor del workflow.
// El primer paso se envía antes de devolver (así el registro ya muestra el
// job en curso) y el resto corre en una tarea de tokio, o en la misma
// llamada con `wait_for_completion`.
use crate::clients::WorkflowLauncher;
use crate::errors::{Result, WorkflowError};
use crate::workflow_type::WorkflowType;
use async_trait::async_trait;
use jobflow::{JobRepository, PipelineEngine};
use log::{info, warn};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

pub struct LocalLauncher<R>
    where R: JobRepository + 'static
{
    engines: HashMap<WorkflowType, Arc<PipelineEngine<R>>>,
    wait: bool,
}

impl<R> LocalLauncher<R> where R: JobRepository + 'static
{
    pub fn new() -> Self {
        Self { engines: HashMap::new(), wait: false }
    }

    pub fn with_engine(mut self, workflow: WorkflowType, engine: Arc<PipelineEngine<R>>) -> Self {
        self.engines.insert(workflow, engine);
        self
    }

    /// Ejecuta el run completo dentro de `start_execution`.
    pub fn wait_for_completion(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }
}

impl<R> Default for LocalLauncher<R> where R: JobRepository + 'static
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R> WorkflowLauncher for LocalLauncher<R> where R: JobRepository + 'static
{
    async fn start_execution(&self, name: &str, input: JsonValue) -> Result<String> {
        let workflow = name.parse::<WorkflowType>().unwrap_or_default();
        let engine = self.engines
                         .get(&workflow)
                         .cloned()
                         .ok_or_else(|| WorkflowError::Validation(format!("workflow no registrado: {}", name)))?;
        let run = engine.start_run(workflow.pipeline_id(), input)?;
        engine.submit_current(&run.run_id).await?;
        let run_id = run.run_id;
        info!("ejecución {} de {} iniciada", run_id, workflow);

        // Lanzada la ejecución, los fallos posteriores quedan en el run.
        if self.wait {
            match engine.run_to_completion(&run_id).await {
                Ok(done) => info!("ejecución {} terminó en {}", run_id, done.state),
                Err(e) => warn!("ejecución {} interrumpida: {}", run_id, e),
            }
        } else {
            tokio::spawn(async move {
                if let Err(e) = engine.run_to_completion(&run_id).await {
                    warn!("ejecución {} interrumpida: {}", run_id, e);
                }
            });
        }
        Ok(run_id.to_string())
    }
}
