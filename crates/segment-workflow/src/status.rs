// status.rs
//
// Traducción de los estados propios de cada servicio a `JobStatus`.
use crate::clients::ServiceJobStatus;
use jobflow::poller::UNKNOWN_REASON;
use jobflow::{JobStatus, StatusSnapshot};

/// Servicio de recomendaciones (soluciones, versiones, importaciones y
/// jobs de segmentos).
pub fn recommendation_status(raw: &str) -> JobStatus {
    match raw {
        "ACTIVE" => JobStatus::Succeeded,
        "CREATE FAILED" => JobStatus::Failed,
        "CREATE PENDING" => JobStatus::Pending,
        "CREATE IN_PROGRESS" => JobStatus::Running,
        "CREATE STOPPING" | "CREATE STOPPED" => JobStatus::Cancelled,
        _ => JobStatus::Running,
    }
}

/// Servicio de resolución de entidades.
pub fn entity_resolution_status(raw: &str) -> JobStatus {
    match raw {
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" => JobStatus::Failed,
        "QUEUED" => JobStatus::Pending,
        _ => JobStatus::Running,
    }
}

/// Motor de consultas.
pub fn query_status(raw: &str) -> JobStatus {
    match raw {
        "QUEUED" => JobStatus::Pending,
        "SUCCEEDED" => JobStatus::Succeeded,
        "FAILED" => JobStatus::Failed,
        "CANCELLED" => JobStatus::Cancelled,
        _ => JobStatus::Running,
    }
}

/// Snapshot con el estado normalizado y el string original. Un FAILED sin
/// motivo recibe `UNKNOWN_REASON`.
pub fn snapshot(raw: &str, status: JobStatus, failure_reason: Option<String>) -> StatusSnapshot {
    let failure_reason = match status {
        JobStatus::Failed => Some(failure_reason.unwrap_or_else(|| UNKNOWN_REASON.to_string())),
        _ => failure_reason,
    };
    StatusSnapshot { status, raw_status: raw.to_string(), failure_reason }
}

pub fn recommendation_snapshot(job: &ServiceJobStatus) -> StatusSnapshot {
    snapshot(&job.status, recommendation_status(&job.status), job.failure_reason.clone())
}

pub fn entity_resolution_snapshot(job: &ServiceJobStatus) -> StatusSnapshot {
    snapshot(&job.status, entity_resolution_status(&job.status), job.failure_reason.clone())
}
