// Archivo: errors.rs
// Propósito: definir la taxonomía de errores del orquestador y el alias
// Result<T> usado por las APIs del crate.
use crate::domain::JobKind;
use std::time::Duration;
use thiserror::Error;

/// Errores del orquestador de jobs.
///
/// - `TransientFetch`: fallo puntual al consultar estado; el poller lo
///   absorbe hasta agotar su presupuesto de reintentos.
/// - `JobFailed`: el servicio externo reportó fallo (no se reintenta).
/// - `JobTimeout`: se agotó el tiempo de espera; el resultado del job es
///   desconocido.
/// - `DuplicateInFlightJob`: el pipeline ya tiene un job en curso.
/// - `Materialization`: fallo en la fase de escritura del artefacto.
#[derive(Error, Debug)]
pub enum JobError {
    /// Fallo transitorio al consultar el estado del job.
    #[error("Error transitorio consultando estado: {0}")]
    TransientFetch(String),
    /// El servicio externo reportó un fallo terminal.
    #[error("Job {job_id} falló: {reason}")]
    JobFailed { job_id: String, reason: String },
    /// El presupuesto de espera se agotó antes de un estado terminal.
    #[error("Job {job_id} sin estado terminal tras {waited:?}")]
    JobTimeout { job_id: String, waited: Duration },
    /// Envío rechazado: el registro del pipeline muestra un job en curso.
    #[error("Ya existe un job {kind} en curso ({job_id}), iniciado en {started_at}")]
    DuplicateInFlightJob { kind: JobKind, job_id: String, started_at: String },
    /// Fallo al escribir el artefacto tabular; el artefacto queda indefinido.
    #[error("Error de materialización: {0}")]
    Materialization(String),
    /// No hay datos de origen que materializar.
    #[error("Sin datos: {0}")]
    NoData(String),
    /// Falta un parámetro obligatorio en el payload de entrada.
    #[error("Parámetro requerido ausente: {0}")]
    MissingParameter(String),
    /// Entidad no encontrada (run, registro, objeto).
    #[error("No encontrado: {0}")]
    NotFound(String),
    /// Conflicto optimista (version/expected mismatch).
    #[error("Conflicto: {0}")]
    Conflict(String),
    /// Transición no permitida por la máquina de estados.
    #[error("Transición inválida: {0}")]
    InvalidTransition(String),
    /// Error genérico de almacenamiento (BD, object store, etc.).
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
    /// Errores de serialización/deserialización JSON.
    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Otro tipo de error.
    #[error("Otro: {0}")]
    Other(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, JobError>;
