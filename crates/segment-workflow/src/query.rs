// query.rs
//
// Ejecución de consultas sobre el motor de consultas: envío, espera con el
// poller genérico, lectura paginada de resultados y formato legible.
use crate::clients::QueryEngine;
use crate::errors::{Result, WorkflowError};
use crate::status::{query_status, snapshot};
use async_trait::async_trait;
use jobflow::{poll, JobError, JobHandle, JobKind, JobStatus, PollConfig, PollInterval, StatusFetcher, StatusSnapshot};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Filas a partir de las cuales el formato muestra sólo una vista previa.
pub const QUERY_RESULT_THRESHOLD: usize = 300;
/// Filas de la vista previa.
pub const PREVIEW_ROWS: usize = 20;

/// Bucket y key de una URI `s3://bucket/key`.
pub fn parse_s3_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri.strip_prefix("s3://")
                  .ok_or_else(|| WorkflowError::Validation(format!("no es una URI s3: {}", uri)))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() => Ok((bucket.to_string(), key.to_string())),
        _ => Err(WorkflowError::Validation(format!("URI s3 sin key: {}", uri))),
    }
}

pub fn s3_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// Ejecución terminada correctamente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecution {
    pub execution_id: String,
    /// Archivo de resultados (`s3://...`).
    pub result_location: String,
}

struct QueryStatusFetcher<'a>(&'a dyn QueryEngine);

#[async_trait]
impl<'a> StatusFetcher for QueryStatusFetcher<'a> {
    async fn fetch_status(&self, job: &JobHandle) -> jobflow::Result<StatusSnapshot> {
        let st = self.0
                     .get_status(&job.job_id)
                     .await
                     .map_err(|e| JobError::TransientFetch(e.to_string()))?;
        Ok(snapshot(&st.state, query_status(&st.state), st.state_change_reason))
    }
}

/// Envía consultas y espera su resultado.
#[derive(Clone)]
pub struct QueryRunner {
    engine: Arc<dyn QueryEngine>,
    poll: PollConfig,
}

impl QueryRunner {
    /// Espera por defecto: consulta cada segundo durante 30 segundos.
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self::with_poll(engine,
                        PollConfig { timeout: Duration::from_secs(30),
                                     interval: PollInterval::Fixed(Duration::from_secs(1)),
                                     max_fetch_retries: 3 })
    }

    pub fn with_poll(engine: Arc<dyn QueryEngine>, poll: PollConfig) -> Self {
        Self { engine, poll }
    }

    pub async fn start(&self, sql: &str, database: &str, output_location: &str) -> Result<JobHandle> {
        let id = self.engine.submit_query(sql, database, output_location).await?;
        info!("consulta {} enviada a {}", id, database);
        Ok(JobHandle::new(id, JobKind::Query, json!({ "database": database, "outputLocation": output_location })))
    }

    /// Envía `sql` y espera a que termine. FAILED/CANCELLED se devuelven como
    /// `JobFailed`; agotar la espera como `JobTimeout`.
    pub async fn run(&self, sql: &str, database: &str, output_location: &str) -> Result<QueryExecution> {
        let handle = self.start(sql, database, output_location).await?;
        let outcome = poll(&handle, &QueryStatusFetcher(self.engine.as_ref()), &JobStatus::TERMINAL, &self.poll).await;
        match outcome.status {
            JobStatus::Succeeded => {}
            JobStatus::Timeout => {
                return Err(JobError::JobTimeout { job_id: handle.job_id, waited: outcome.elapsed }.into());
            }
            other => {
                let reason = outcome.failure_reason.unwrap_or_else(|| other.to_string());
                return Err(JobError::JobFailed { job_id: handle.job_id, reason }.into());
            }
        }
        let status = self.engine.get_status(&handle.job_id).await?;
        let result_location = status.output_location
                                    .unwrap_or_else(|| format!("{}{}.csv", output_location, handle.job_id));
        Ok(QueryExecution { execution_id: handle.job_id, result_location })
    }

    /// Lee las filas de resultados (cabecera incluida) recorriendo páginas
    /// hasta `max_rows` si se indica.
    pub async fn fetch_rows(&self, execution_id: &str, max_rows: Option<usize>) -> Result<Vec<Vec<Option<String>>>> {
        let mut rows = Vec::new();
        let mut token = None;
        loop {
            let page = self.engine.get_results(execution_id, token).await?;
            rows.extend(page.rows);
            if let Some(max) = max_rows {
                if rows.len() >= max {
                    rows.truncate(max);
                    break;
                }
            }
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        Ok(rows)
    }

    /// Ejecuta y devuelve el texto formateado con el id de ejecución al
    /// final. Los errores también se devuelven como texto.
    pub async fn execute_and_format(&self, sql: &str, database: &str, output_location: &str) -> String {
        let exec = match self.run(sql, database, output_location).await {
            Ok(e) => e,
            Err(e) => return format!("Error ejecutando la consulta: {}", e),
        };
        match self.fetch_rows(&exec.execution_id, Some(QUERY_RESULT_THRESHOLD + 1)).await {
            Ok(rows) => format!("{}\n\nId de ejecución: {}", format_query_results(sql, &rows, QUERY_RESULT_THRESHOLD), exec.execution_id),
            Err(e) => format!("Error leyendo resultados: {}", e),
        }
    }
}

fn format_row(row: &[Option<String>]) -> String {
    row.iter().map(|c| c.as_deref().unwrap_or("NULL")).collect::<Vec<_>>().join(" | ")
}

/// Formatea filas de resultados (la primera es la cabecera). Con
/// `threshold` filas o más sólo se muestra una vista previa.
pub fn format_query_results(sql: &str, rows: &[Vec<Option<String>>], threshold: usize) -> String {
    let Some((header, data)) = rows.split_first() else {
        return "La consulta se ejecutó correctamente pero no devolvió resultados.".to_string();
    };
    let header = format_row(header);
    let mut out = vec![format!("Consulta SQL: {}\n", sql)];
    let row_count = data.len();
    if row_count >= threshold {
        out.push(format!("Resultados: más de {} filas (supera el umbral)", row_count));
        out.push("\nEl resultado es demasiado grande; se muestra una vista previa y conviene descargarlo completo como CSV.".into());
        out.push("\nPrimeras filas:".into());
        out.push(header.clone());
        out.push("-".repeat(header.len()));
        out.extend(data.iter().take(PREVIEW_ROWS).map(|r| format_row(r)));
        out.push("...".into());
    } else {
        out.push(format!("Resultados: {} filas", row_count));
        out.push(header.clone());
        out.push("-".repeat(header.len()));
        out.extend(data.iter().map(|r| format_row(r)));
    }
    out.join("\n")
}
