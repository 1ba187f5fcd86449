// Archivo: service.rs
// Propósito: implementar `JobService`, la capa que envía jobs externos
// protegiéndolos contra duplicados y mantiene el registro "latest" de cada
// identidad de pipeline.
use crate::domain::{JobHandle, JobKind, JobRecord, JobStatus, PersistResult};
use crate::errors::{JobError, Result};
use crate::repository::JobRepository;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;

/// Modo de protección contra envíos duplicados.
///
/// - `Advisory`: lee el registro, envía y escribe (check-then-act). Dos
///   invocaciones concurrentes pueden enviar ambas; la carrera queda acotada
///   al número de invocaciones que se solapan.
/// - `Conditional`: reserva el slot con una escritura condicional por
///   `version` antes de llamar al servicio externo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionGuard {
    #[default]
    Advisory,
    Conditional,
}

impl SubmissionGuard {
    /// `JOBFLOW_CONDITIONAL_SUBMIT=true` activa el modo condicional.
    pub fn from_flag(conditional: bool) -> Self {
        if conditional {
            SubmissionGuard::Conditional
        } else {
            SubmissionGuard::Advisory
        }
    }
}

/// Servicio de envío y seguimiento de jobs sobre un `JobRepository`.
pub struct JobService<R>
    where R: JobRepository + ?Sized
{
    repo: Arc<R>,
    guard: SubmissionGuard,
}

impl<R> JobService<R> where R: JobRepository + ?Sized
{
    pub fn new(repo: Arc<R>, guard: SubmissionGuard) -> Self {
        Self { repo, guard }
    }

    pub fn guard(&self) -> SubmissionGuard {
        self.guard
    }

    /// Registro "latest" de `pipeline_id`, si existe.
    pub fn latest(&self, pipeline_id: &str) -> Result<Option<JobRecord>> {
        self.repo.get_record(pipeline_id)
    }

    /// Falla con `DuplicateInFlightJob` si el registro muestra un job todavía
    /// en curso, sea del tipo que sea: el registro es un único slot y
    /// pisarlo haría perder el seguimiento de ese job. Devuelve el registro
    /// leído.
    pub fn ensure_no_in_flight(&self, pipeline_id: &str, kind: JobKind) -> Result<Option<JobRecord>> {
        let record = self.repo.get_record(pipeline_id)?;
        if let Some(r) = &record {
            if r.in_flight() {
                warn!("envío de {} rechazado para {}: job {:?} ({:?}) en curso",
                      kind, pipeline_id, r.current_job_id, r.job_kind);
                return Err(duplicate_error(r, kind));
            }
        }
        Ok(record)
    }

    /// Envía un job de `kind` ejecutando `submit` sólo si no hay otro job en
    /// curso en el pipeline, y deja el registro en RUNNING con el nuevo id.
    ///
    /// Si `submit` falla en modo condicional la reserva se libera marcando el
    /// registro como FAILED; en modo advisory el registro no se toca.
    pub async fn submit<F, Fut>(&self, pipeline_id: &str, kind: JobKind, params: JsonValue, submit: F) -> Result<JobHandle>
        where F: FnOnce() -> Fut,
              Fut: Future<Output = Result<JobHandle>>
    {
        let observed = self.ensure_no_in_flight(pipeline_id, kind)?;
        match self.guard {
            SubmissionGuard::Advisory => {
                let handle = submit().await?;
                self.write_running(pipeline_id, &handle, observed)?;
                Ok(handle)
            }
            SubmissionGuard::Conditional => {
                let reserved = self.reserve(pipeline_id, kind, params, observed.as_ref().map(|r| r.version))?;
                match submit().await {
                    Ok(handle) => {
                        let mut record = reserved;
                        fill_running(&mut record, &handle);
                        match self.repo.compare_and_put(&record, Some(record.version))? {
                            PersistResult::Ok { .. } => Ok(handle),
                            PersistResult::Conflict => {
                                Err(JobError::Conflict(format!("registro {} modificado durante el envío de {}", pipeline_id, handle.job_id)))
                            }
                        }
                    }
                    Err(e) => {
                        let mut record = reserved;
                        record.status = Some(JobStatus::Failed);
                        record.completed_at = Some(Utc::now());
                        record.error_message = Some(e.to_string());
                        self.repo.put_record(&record)?;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Actualiza el estado del job `job_id` en el registro. Si el registro ya
    /// apunta a otro job no se escribe nada y devuelve `None`.
    pub fn record_status(&self,
                         pipeline_id: &str,
                         job_id: &str,
                         status: JobStatus,
                         failure_reason: Option<String>)
                         -> Result<Option<JobRecord>> {
        let Some(mut record) = self.repo.get_record(pipeline_id)? else {
            debug!("sin registro para {}; estado {} de {} ignorado", pipeline_id, status, job_id);
            return Ok(None);
        };
        if record.current_job_id.as_deref() != Some(job_id) {
            debug!("registro {} apunta a {:?}; estado {} de {} ignorado",
                   pipeline_id, record.current_job_id, status, job_id);
            return Ok(None);
        }
        if record.status == Some(status) {
            return Ok(Some(record));
        }
        record.status = Some(status);
        if status.is_terminal() {
            record.completed_at = Some(Utc::now());
        }
        record.error_message = failure_reason;
        let saved = self.repo.put_record(&record)?;
        info!("registro {}: job {} -> {}", pipeline_id, job_id, status);
        Ok(Some(saved))
    }

    fn write_running(&self, pipeline_id: &str, handle: &JobHandle, observed: Option<JobRecord>) -> Result<JobRecord> {
        let mut record = observed.unwrap_or_else(|| JobRecord::empty(pipeline_id));
        fill_running(&mut record, handle);
        let saved = self.repo.put_record(&record)?;
        info!("registro {}: job {} ({}) RUNNING", pipeline_id, handle.job_id, handle.kind);
        Ok(saved)
    }

    fn reserve(&self, pipeline_id: &str, kind: JobKind, params: JsonValue, expected: Option<i64>) -> Result<JobRecord> {
        let mut record = JobRecord::empty(pipeline_id);
        record.job_kind = Some(kind);
        record.status = Some(JobStatus::Pending);
        record.created_at = Some(Utc::now());
        record.params = params;
        match self.repo.compare_and_put(&record, expected)? {
            PersistResult::Ok { new_version } => {
                record.version = new_version;
                debug!("slot {} reservado para {} (version {})", pipeline_id, kind, new_version);
                Ok(record)
            }
            PersistResult::Conflict => {
                warn!("reserva de {} para {} perdió la carrera", kind, pipeline_id);
                match self.repo.get_record(pipeline_id)? {
                    Some(current) if current.in_flight() => Err(duplicate_error(&current, kind)),
                    _ => Err(JobError::Conflict(format!("registro {} cambió durante la reserva", pipeline_id))),
                }
            }
        }
    }
}

fn fill_running(record: &mut JobRecord, handle: &JobHandle) {
    record.current_job_id = Some(handle.job_id.clone());
    record.job_kind = Some(handle.kind);
    record.status = Some(JobStatus::Running);
    record.created_at = Some(handle.created_at);
    record.completed_at = None;
    record.params = handle.params.clone();
    record.error_message = None;
}

// `kind` del error es el del job que ocupa el slot.
fn duplicate_error(record: &JobRecord, requested: JobKind) -> JobError {
    JobError::DuplicateInFlightJob { kind: record.job_kind.unwrap_or(requested),
                                     job_id: record.current_job_id.clone().unwrap_or_else(|| "(reservado)".to_string()),
                                     started_at: record.created_at
                                                       .map(|t| t.to_rfc3339())
                                                       .unwrap_or_else(|| "desconocido".to_string()) }
}
