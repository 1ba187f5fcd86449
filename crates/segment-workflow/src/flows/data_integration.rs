// data_integration.rs
//
// Flujo completo: resolución de identidades, actualización del cliente
// integrado, importación, solución, versión, segmento y materialización.
use crate::clients::Services;
use crate::config::PipelineConfig;
use crate::errors::Result;
use crate::query::QueryRunner;
use crate::steps::{BatchSegmentStep, ImportStep, IntegratedCustomerUpdateStep, MaterializeSegmentStep, ResolveStep,
                   SolutionVersionSource, TrainSolutionStep, TrainSolutionVersionStep};
use jobflow::PipelineStep;
use std::sync::Arc;

/// Pasos del flujo de integración en orden. Falla con `Config` si falta
/// alguna variable que sólo este flujo necesita.
pub fn data_integration_steps(services: &Services, config: &PipelineConfig) -> Result<Vec<Arc<dyn PipelineStep>>> {
    let workflow_name = PipelineConfig::require(&config.workflow_name, "WORKFLOW_NAME")?;
    let bucket = PipelineConfig::require(&config.bucket_name, "BUCKET_NAME")?;
    let source_prefix = PipelineConfig::require(&config.source_prefix, "SOURCE_PREFIX")?;
    let dest_prefix = PipelineConfig::require(&config.dest_prefix, "DEST_PREFIX")?;
    let dataset_arn = PipelineConfig::require(&config.dataset_arn, "DATASET_ARN")?;
    let recipe_arn = PipelineConfig::require(&config.recipe_arn, "RECIPE_ARN")?;
    let query = QueryRunner::new(services.query.clone());

    let steps: Vec<Arc<dyn PipelineStep>> =
        vec![Arc::new(ResolveStep::new(services.entity_resolution.clone(), workflow_name)),
             Arc::new(IntegratedCustomerUpdateStep::new(services.store.clone(), bucket, source_prefix, dest_prefix)),
             Arc::new(ImportStep::new(query.clone(),
                                      services.recommendation.clone(),
                                      config.glue_database.clone(),
                                      config.output_bucket.clone(),
                                      dataset_arn,
                                      config.role_arn.clone())),
             Arc::new(TrainSolutionStep::new(services.recommendation.clone(),
                                             config.dataset_group_arn.clone(),
                                             recipe_arn,
                                             config.solutions_to_keep)),
             Arc::new(TrainSolutionVersionStep::new(services.recommendation.clone())),
             Arc::new(BatchSegmentStep::new(query,
                                            services.recommendation.clone(),
                                            services.store.clone(),
                                            config.glue_database.clone(),
                                            config.output_bucket.clone(),
                                            config.segment_bucket.clone(),
                                            config.segment_prefix.clone(),
                                            config.role_arn.clone(),
                                            config.users_per_segment,
                                            SolutionVersionSource::PreviousStep)),
             Arc::new(MaterializeSegmentStep::new(services.store.clone(),
                                                  config.segment_bucket.clone(),
                                                  config.segment_prefix.clone(),
                                                  config.target_bucket.clone(),
                                                  config.target_prefix.clone()))];
    Ok(steps)
}
