#![allow(dead_code)]

use jobflow::stubs::InMemoryObjectStore;
use segment_workflow::clients::Services;
use segment_workflow::stubs::{FakeCatalog, FakeEntityResolution, FakeQueryEngine, FakeRecommendationService};
use segment_workflow::PipelineConfig;
use std::collections::HashMap;
use std::sync::Arc;

pub const SEGMENT_BUCKET: &str = "seg";
pub const TARGET_BUCKET: &str = "data";
pub const TARGET_PREFIX: &str = "item_based_segment/";
pub const CUSTOMER_BUCKET: &str = "customer";

/// Servicios falsos compartiendo un único almacén de objetos.
pub struct Harness {
  pub store: Arc<InMemoryObjectStore>,
  pub query: Arc<FakeQueryEngine>,
  pub recommendation: Arc<FakeRecommendationService>,
  pub entity_resolution: Arc<FakeEntityResolution>,
  pub services: Services,
  pub config: PipelineConfig,
}

pub fn config_vars() -> HashMap<String, String> {
  [("GLUE_DATABASE_NAME", "marketing"),
   ("OUTPUT_BUCKET", "out"),
   ("SEGMENT_BUCKET", SEGMENT_BUCKET),
   ("SEGMENT_PREFIX", "segments/"),
   ("TARGET_BUCKET", TARGET_BUCKET),
   ("TARGET_PREFIX", TARGET_PREFIX),
   ("DATASET_ARN", "arn:dataset/interactions"),
   ("DATASET_GROUP_ARN", "arn:dsg/retail"),
   ("RECIPE_ARN", "arn:recipe/item-affinity"),
   ("PERSONALIZE_ROLE_ARN", "arn:role/personalize"),
   ("WORKFLOW_NAME", "matching-workflow"),
   ("BUCKET_NAME", CUSTOMER_BUCKET),
   ("SOURCE_PREFIX", "matching"),
   ("DEST_PREFIX", "integrated"),
   ("USER_PER_SEGMENT", "2")].into_iter()
                             .map(|(k, v)| (k.to_string(), v.to_string()))
                             .collect()
}

impl Harness {
  /// `users`: usuarios que el job de segmentos asigna a cada ítem.
  pub fn new(users: &[&str]) -> Self {
    Self::build(users, FakeEntityResolution::default())
  }

  pub fn build(users: &[&str], entity_resolution: FakeEntityResolution) -> Self {
    let store = Arc::new(InMemoryObjectStore::new());
    let query = Arc::new(FakeQueryEngine::new(store.clone()).with_result("item_master",
                                                                          &["item_id"],
                                                                          vec![vec!["I1"], vec!["I2"]]));
    let recommendation = Arc::new(FakeRecommendationService::new().with_segment_output(store.clone(), users));
    let entity_resolution = Arc::new(entity_resolution);
    let services = Services { catalog: Arc::new(FakeCatalog::new()),
                              query: query.clone(),
                              recommendation: recommendation.clone(),
                              entity_resolution: entity_resolution.clone(),
                              store: store.clone() };
    let config = PipelineConfig::from_vars(&config_vars()).expect("config de prueba");
    Self { store, query, recommendation, entity_resolution, services, config }
  }

  pub fn body(&self, bucket: &str, key: &str) -> String {
    let obj = self.store.object(bucket, key).expect("objeto inexistente");
    String::from_utf8(obj.body).expect("utf-8")
  }

  /// Keys de artefactos CSV bajo el prefijo destino.
  pub fn artifacts(&self) -> Vec<String> {
    self.store
        .keys(TARGET_BUCKET)
        .into_iter()
        .filter(|k| k.starts_with(TARGET_PREFIX) && k.ends_with(".csv"))
        .collect()
  }
}
