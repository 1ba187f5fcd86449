use jobflow::JobError;
use thiserror::Error;

// Errores del pipeline concreto.
//
// Este enum envuelve los errores del orquestador (`JobError`) y agrega los
// propios de los servicios externos, la configuración y las validaciones de
// entrada. Los pasos devuelven `jobflow::Result`, por eso existe la
// conversión inversa `WorkflowError -> JobError`.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Errores originados por el orquestador (`jobflow`).
    #[error("Error de orquestación: {0}")]
    Job(#[from] JobError),

    /// Un servicio externo (catálogo, consultas, recomendaciones, resolución
    /// de entidades, lanzador) respondió con error.
    #[error("Error de servicio: {0}")]
    Service(String),

    /// Entrada inválida (ids vacíos, URIs mal formadas, etc.).
    #[error("Error de validacion: {0}")]
    Validation(String),

    /// Variable de configuración ausente o con formato inválido.
    #[error("Error de configuracion: {0}")]
    Config(String),

    /// Errores de serializacion/deserializacion JSON.
    #[error("Error de serializacion: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<WorkflowError> for JobError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Job(inner) => inner,
            WorkflowError::Serialization(inner) => JobError::Serialization(inner),
            WorkflowError::Validation(msg) => JobError::MissingParameter(msg),
            other => JobError::Other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
