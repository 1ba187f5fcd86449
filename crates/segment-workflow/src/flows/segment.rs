// segment.rs
//
// Flujo de segmentos: job de segmentos y materialización, usando una
// versión de solución ya entrenada.
use crate::clients::Services;
use crate::config::PipelineConfig;
use crate::query::QueryRunner;
use crate::steps::{BatchSegmentStep, MaterializeSegmentStep, SolutionVersionSource};
use jobflow::{JobRepository, PipelineStep};
use std::sync::Arc;

/// `repo` se usa para encontrar la última versión de solución cuando la
/// entrada del run no trae `solutionVersionArn`.
pub fn segment_steps(services: &Services, config: &PipelineConfig, repo: Arc<dyn JobRepository>) -> Vec<Arc<dyn PipelineStep>> {
    vec![Arc::new(BatchSegmentStep::new(QueryRunner::new(services.query.clone()),
                                        services.recommendation.clone(),
                                        services.store.clone(),
                                        config.glue_database.clone(),
                                        config.output_bucket.clone(),
                                        config.segment_bucket.clone(),
                                        config.segment_prefix.clone(),
                                        config.role_arn.clone(),
                                        config.users_per_segment,
                                        SolutionVersionSource::Latest(repo))),
         Arc::new(MaterializeSegmentStep::new(services.store.clone(),
                                              config.segment_bucket.clone(),
                                              config.segment_prefix.clone(),
                                              config.target_bucket.clone(),
                                              config.target_prefix.clone()))]
}
