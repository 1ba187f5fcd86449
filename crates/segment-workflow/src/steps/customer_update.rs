// customer_update.rs
//! Paso 2 (local): reemplazar los archivos del cliente integrado con la
//! salida `success` del job de matching.
use super::{with_trailing_slash, CUSTOMER_UPDATE, RESOLVE};
use async_trait::async_trait;
use jobflow::{copy_prefix, delete_prefix, ObjectStore, PipelineStep, RunContext, StepSubmission};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveOutput {
    job_id: String,
}

pub struct IntegratedCustomerUpdateStep {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    source_prefix: String,
    dest_prefix: String,
}

impl IntegratedCustomerUpdateStep {
    pub fn new(store: Arc<dyn ObjectStore>,
               bucket: impl Into<String>,
               source_prefix: impl Into<String>,
               dest_prefix: impl Into<String>)
               -> Self {
        Self { store, bucket: bucket.into(), source_prefix: source_prefix.into(), dest_prefix: dest_prefix.into() }
    }

    /// Prefijo de la salida exitosa del job de matching.
    pub fn success_prefix(&self, job_id: &str) -> String {
        format!("{}/{}/success/", self.source_prefix.trim_end_matches('/'), job_id)
    }
}

#[async_trait]
impl PipelineStep for IntegratedCustomerUpdateStep {
    fn name(&self) -> &str {
        CUSTOMER_UPDATE
    }

    async fn submit(&self, ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        let prev: ResolveOutput = ctx.require_output(RESOLVE)?;
        let dest = with_trailing_slash(&self.dest_prefix);
        let deleted = delete_prefix(self.store.as_ref(), &self.bucket, &dest, |_| true).await?;
        let source = self.success_prefix(&prev.job_id);
        let copied = copy_prefix(self.store.as_ref(), &self.bucket, &source, &dest).await?;
        Ok(StepSubmission::Completed(json!({ "jobId": prev.job_id,
                                             "sourcePrefix": source,
                                             "destPrefix": dest,
                                             "deleted": deleted,
                                             "copied": copied })))
    }
}
