// materialize_segment.rs
//! Paso 7 (local): convertir la salida del job de segmentos en el CSV
//! `item_id,user_id` del destino, con reemplazo completo.
use super::{BATCH_SEGMENT, MATERIALIZE_SEGMENT};
use async_trait::async_trait;
use chrono::Utc;
use jobflow::{list_all_keys, ArtifactLocation, ArtifactSchema, JobError, Materializer, ObjectStore, PipelineStep, RunContext,
              SegmentRecordMapper, StepSubmission};
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;

const OUTPUT_SUFFIX: &str = ".json.out";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentOutput {
    job_name: String,
}

pub struct MaterializeSegmentStep {
    store: Arc<dyn ObjectStore>,
    segment_bucket: String,
    segment_prefix: String,
    target_bucket: String,
    target_prefix: String,
}

impl MaterializeSegmentStep {
    pub fn new(store: Arc<dyn ObjectStore>,
               segment_bucket: impl Into<String>,
               segment_prefix: impl Into<String>,
               target_bucket: impl Into<String>,
               target_prefix: impl Into<String>)
               -> Self {
        Self { store,
               segment_bucket: segment_bucket.into(),
               segment_prefix: segment_prefix.into(),
               target_bucket: target_bucket.into(),
               target_prefix: target_prefix.into() }
    }
}

#[async_trait]
impl PipelineStep for MaterializeSegmentStep {
    fn name(&self) -> &str {
        MATERIALIZE_SEGMENT
    }

    async fn submit(&self, ctx: &RunContext) -> jobflow::Result<StepSubmission> {
        let prev: SegmentOutput = ctx.require_output(BATCH_SEGMENT)?;
        let source_prefix = format!("{}output/{}/", self.segment_prefix, prev.job_name);
        info!("procesando salida de segmentos en s3://{}/{}", self.segment_bucket, source_prefix);

        let files: Vec<String> = list_all_keys(self.store.as_ref(), &self.segment_bucket, &source_prefix).await?
                                                                                                        .into_iter()
                                                                                                        .filter(|k| k.ends_with(OUTPUT_SUFFIX))
                                                                                                        .collect();
        // Sin archivos no se toca el artefacto anterior.
        if files.is_empty() {
            return Err(JobError::NoData(format!("no hay archivos {} en s3://{}/{}",
                                                OUTPUT_SUFFIX, self.segment_bucket, source_prefix)));
        }

        let mut lines = Vec::new();
        let mut undecodable = 0;
        for key in &files {
            let body = self.store.get(&self.segment_bucket, key).await?;
            undecodable += decode_lines(key, &body, &mut lines);
        }

        let target = ArtifactLocation::timestamped(self.target_bucket.clone(), self.target_prefix.clone(), "segment_results", Utc::now());
        let mut report = Materializer::new(self.store.clone()).materialize(lines, &SegmentRecordMapper, &target, &ArtifactSchema::segment())
                                                              .await?;
        report.skipped += undecodable;
        info!("{} archivos procesados, {} filas, {} descartados", files.len(), report.rows, report.skipped);

        let mut out = serde_json::to_value(&report)?;
        out["files"] = serde_json::json!(files.len());
        out["jobName"] = serde_json::json!(prev.job_name);
        Ok(StepSubmission::Completed(out))
    }
}

// Una línea que no es UTF-8 se descarta como registro malformado; el resto
// del archivo se procesa. Devuelve cuántas se descartaron.
fn decode_lines(key: &str, body: &[u8], lines: &mut Vec<String>) -> usize {
    let mut undecodable = 0;
    for (n, raw) in body.split(|b| *b == b'\n').enumerate() {
        match std::str::from_utf8(raw) {
            Ok(line) => lines.push(line.to_string()),
            Err(e) => {
                warn!("{}: línea {} descartada, no es UTF-8: {}", key, n + 1, e);
                undecodable += 1;
            }
        }
    }
    undecodable
}
