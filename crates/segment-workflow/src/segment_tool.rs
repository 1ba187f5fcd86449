// segment_tool.rs
//
// Operaciones de cara al agente sobre el flujo de segmentos: iniciar un
// segmento por ítems y consultar el estado del último. Ambas devuelven
// siempre un mensaje legible; los errores también se informan como texto.
use crate::clients::WorkflowLauncher;
use crate::workflow_type::WorkflowType;
use jobflow::{JobRecord, JobRepository, JobStatus, RunState};
use log::{error, info, warn};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

pub struct SegmentTool {
    repo: Arc<dyn JobRepository>,
    launcher: Arc<dyn WorkflowLauncher>,
}

fn describe_items(params: &JsonValue) -> String {
    if let Some(ids) = params.get("itemIds").and_then(|v| v.as_array()) {
        let ids: Vec<&str> = ids.iter().filter_map(|v| v.as_str()).collect();
        return format!("[{}]", ids.join(", "));
    }
    match params.get("itemCount").and_then(|v| v.as_u64()) {
        Some(n) => format!("{} ítems del maestro", n),
        None => "(sin datos)".to_string(),
    }
}

fn started_at(record: &JobRecord) -> String {
    record.created_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "hora desconocida".to_string())
}

impl SegmentTool {
    pub fn new(repo: Arc<dyn JobRepository>, launcher: Arc<dyn WorkflowLauncher>) -> Self {
        Self { repo, launcher }
    }

    fn pipeline_id(&self) -> &'static str {
        WorkflowType::Segment.pipeline_id()
    }

    /// Lanza el flujo de segmentos para `item_ids` salvo que ya haya un job de
    /// segmentos en curso.
    pub async fn start_item_segment(&self, item_ids: &[String]) -> String {
        if item_ids.is_empty() {
            return "Error: no se indicaron ids de ítem".to_string();
        }
        match self.repo.get_record(self.pipeline_id()) {
            Ok(Some(rec)) if rec.in_flight() => {
                return format!("Error: ya hay un job de segmentos en curso, iniciado en {} para los ítems {}. \
                                Espera a que termine antes de iniciar otro; puedes consultar su estado con check_segment_status.",
                               started_at(&rec),
                               describe_items(&rec.params));
            }
            Ok(_) => {}
            Err(e) => {
                error!("no se pudo leer el registro de segmentos: {}", e);
                return format!("Error consultando el estado del segmento: {}", e);
            }
        }

        info!("iniciando segmento por ítems para {:?}", item_ids);
        match self.launcher.start_execution(self.pipeline_id(), json!({ "itemIds": item_ids })).await {
            Ok(execution) => {
                info!("ejecución de segmentos iniciada: {}", execution);
                format!("La creación del segmento por ítems se inició correctamente (ejecución {}). El proceso tarda varios \
                         minutos; consulta su estado con check_segment_status. Al terminar, los datos quedan en la tabla \
                         item_based_segment.",
                        execution)
            }
            Err(e) => {
                error!("no se pudo iniciar el segmento: {}", e);
                format!("Error creando el segmento por ítems: {}", e)
            }
        }
    }

    /// Estado legible del último job de segmentos.
    pub fn check_segment_status(&self) -> String {
        let record = match self.repo.get_record(self.pipeline_id()) {
            Ok(r) => r,
            Err(e) => return format!("Error consultando el estado del segmento: {}", e),
        };
        let Some(rec) = record.filter(|r| r.status.is_some()) else {
            return "Todavía no se creó ningún job de segmentos".to_string();
        };
        let items = describe_items(&rec.params);
        match rec.status {
            Some(JobStatus::Pending) | Some(JobStatus::Running) => {
                format!("El job de segmentos está en curso. Iniciado en {}. Ítems: {}", started_at(&rec), items)
            }
            Some(JobStatus::Succeeded) => self.completed_message(&rec, &items),
            Some(status) => {
                let reason = rec.error_message.clone().unwrap_or_else(|| "Error desconocido".to_string());
                format!("El job de segmentos falló ({}): {}", status, reason)
            }
            None => "Todavía no se creó ningún job de segmentos".to_string(),
        }
    }

    // El job puede haber terminado y la materialización seguir pendiente o
    // haber fallado: se mira el run que lo envió.
    fn completed_message(&self, rec: &JobRecord, items: &str) -> String {
        let completed_at = rec.completed_at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "hora desconocida".to_string());
        let job_id = rec.current_job_id.as_deref();
        let run = match self.repo.list_runs(self.pipeline_id()) {
            Ok(runs) => runs.into_iter().find(|r| job_id.is_some() && r.job_ids().contains(&job_id)),
            Err(e) => {
                warn!("no se pudieron leer los runs de segmentos: {}", e);
                return format!("El job de segmentos terminó en {}, pero no se pudo determinar el estado de la \
                                materialización: {}",
                               completed_at,
                               e);
            }
        };
        match run.map(|r| r.state) {
            Some(RunState::Failed { reason, .. }) => {
                format!("El job de segmentos terminó en {} pero la materialización falló: {}", completed_at, reason)
            }
            Some(RunState::Succeeded) | None => {
                format!("El job de segmentos terminó correctamente en {}. Iniciado en {}. Ítems: {}. \
                         Los datos ya están en la tabla item_based_segment.",
                        completed_at,
                        started_at(rec),
                        items)
            }
            Some(_) => format!("El job de segmentos terminó en {}; los resultados se están materializando.", completed_at),
        }
    }
}
