// Archivo: domain.rs
// Propósito: tipos de dominio del orquestador: jobs, estados normalizados,
// el registro persistido "latest" y el `PipelineRun` con su máquina de
// estados.
use crate::errors::{JobError, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Tipo de trabajo asíncrono enviado a un servicio externo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Import,
    Resolve,
    TrainSolution,
    TrainSolutionVersion,
    BatchSegment,
    /// Ejecución del motor de consultas.
    Query,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Import => "import",
            JobKind::Resolve => "resolve",
            JobKind::TrainSolution => "train-solution",
            JobKind::TrainSolutionVersion => "train-solution-version",
            JobKind::BatchSegment => "batch-segment",
            JobKind::Query => "query",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "import" => Ok(JobKind::Import),
            "resolve" => Ok(JobKind::Resolve),
            "train-solution" => Ok(JobKind::TrainSolution),
            "train-solution-version" => Ok(JobKind::TrainSolutionVersion),
            "batch-segment" => Ok(JobKind::BatchSegment),
            "query" => Ok(JobKind::Query),
            other => Err(JobError::Other(format!("tipo de job desconocido: {}", other))),
        }
    }
}

/// Estado normalizado de un job. Los strings propios de cada servicio se
/// traducen a este enum antes de llegar al orquestador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Estado del lado del poller: se agotó la espera.
    Timeout,
}

impl JobStatus {
    /// Estados terminales reportables por un servicio (TIMEOUT lo produce
    /// sólo el poller).
    pub const TERMINAL: [JobStatus; 3] = [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Cancelled];

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    /// PENDING o RUNNING: el job sigue vivo en el servicio externo.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            "TIMEOUT" => Ok(JobStatus::Timeout),
            other => Err(JobError::Other(format!("estado de job desconocido: {}", other))),
        }
    }
}

/// Referencia a un job enviado: lo mínimo para consultar su estado y
/// auditarlo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Identificador opaco asignado por el servicio externo.
    pub job_id: String,
    pub kind: JobKind,
    pub created_at: DateTime<Utc>,
    /// Parámetros necesarios para reenviar o auditar el job.
    pub params: JsonValue,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>, kind: JobKind, params: JsonValue) -> Self {
        Self { job_id: job_id.into(), kind, created_at: Utc::now(), params }
    }

    /// Lee un parámetro de texto obligatorio de `params`.
    pub fn param_str(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| JobError::MissingParameter(format!("{} (job {})", name, self.job_id)))
    }
}

/// Un job con su último estado conocido.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub params: JsonValue,
    pub failure_reason: Option<String>,
}

impl Job {
    pub fn from_handle(handle: &JobHandle, status: JobStatus, failure_reason: Option<String>) -> Self {
        Self { job_id: handle.job_id.clone(),
               kind: handle.kind,
               status,
               created_at: handle.created_at,
               params: handle.params.clone(),
               failure_reason }
    }
}

/// Registro persistido "latest" de una identidad de pipeline.
///
/// Es un único slot lógico sobrescrito en sitio por el último paso que
/// escribe (read-modify-write, last-writer-wins). `version` crece en cada
/// escritura y permite la escritura condicional opcional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub pipeline_id: String,
    pub current_job_id: Option<String>,
    pub job_kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub params: JsonValue,
    pub error_message: Option<String>,
    pub version: i64,
}

impl JobRecord {
    /// Registro vacío (sin job) para `pipeline_id`.
    pub fn empty(pipeline_id: impl Into<String>) -> Self {
        Self { pipeline_id: pipeline_id.into(),
               current_job_id: None,
               job_kind: None,
               status: None,
               created_at: None,
               completed_at: None,
               params: JsonValue::Object(serde_json::Map::new()),
               error_message: None,
               version: 0 }
    }

    /// `true` si el slot está ocupado por un job (de cualquier tipo) todavía
    /// en curso. Mientras tanto no se admite otro envío en el pipeline.
    pub fn in_flight(&self) -> bool {
        self.status.map(|s| s.is_in_flight()).unwrap_or(false)
    }
}

/// Resultado de una escritura con control optimista de versión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistResult {
    Ok { new_version: i64 },
    Conflict,
}

/// Estado de un `PipelineRun`. `step` es el índice del paso.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    StepSubmitted { step: usize },
    StepRunning { step: usize },
    StepSucceeded { step: usize },
    Succeeded,
    Failed { step: usize, status: JobStatus, reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NOT_STARTED"),
            RunState::StepSubmitted { step } => write!(f, "STEP_{}_SUBMITTED", step),
            RunState::StepRunning { step } => write!(f, "STEP_{}_RUNNING", step),
            RunState::StepSucceeded { step } => write!(f, "STEP_{}_SUCCEEDED", step),
            RunState::Succeeded => write!(f, "RUN_SUCCEEDED"),
            RunState::Failed { .. } => write!(f, "RUN_FAILED"),
        }
    }
}

/// Una ejecución ordenada de pasos dependientes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline_id: String,
    /// Nombres de los pasos, en orden.
    pub steps: Vec<String>,
    /// Job enviado por cada paso (None para pasos no enviados o inline).
    pub jobs: Vec<Option<JobHandle>>,
    pub current_step: usize,
    pub state: RunState,
    /// Salidas por paso (`"input"` guarda la entrada del run).
    pub outputs: IndexMap<String, JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl PipelineRun {
    pub fn new(pipeline_id: impl Into<String>, steps: Vec<String>, input: JsonValue) -> Self {
        let now = Utc::now();
        let mut outputs = IndexMap::new();
        outputs.insert("input".to_string(), input);
        Self { run_id: Uuid::new_v4(),
               pipeline_id: pipeline_id.into(),
               jobs: vec![None; steps.len()],
               steps,
               current_step: 0,
               state: RunState::NotStarted,
               outputs,
               created_at: now,
               updated_at: now,
               version: 0 }
    }

    /// Estado global derivado del estado del paso actual.
    pub fn status(&self) -> JobStatus {
        match &self.state {
            RunState::NotStarted | RunState::StepSubmitted { .. } => JobStatus::Pending,
            RunState::StepRunning { .. } | RunState::StepSucceeded { .. } => JobStatus::Running,
            RunState::Succeeded => JobStatus::Succeeded,
            RunState::Failed { status, .. } => *status,
        }
    }

    /// Ids de job en orden de paso.
    pub fn job_ids(&self) -> Vec<Option<&str>> {
        self.jobs.iter().map(|j| j.as_ref().map(|h| h.job_id.as_str())).collect()
    }

    pub fn current_job(&self) -> Option<&JobHandle> {
        self.jobs.get(self.current_step).and_then(|j| j.as_ref())
    }

    /// Índice del próximo paso a enviar, si el run admite un envío ahora.
    pub fn next_step(&self) -> Option<usize> {
        match self.state {
            RunState::NotStarted if !self.steps.is_empty() => Some(0),
            RunState::StepSucceeded { step } if step + 1 < self.steps.len() => Some(step + 1),
            _ => None,
        }
    }

    /// Aplica una transición validando que sea legal.
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        let last = self.steps.len().saturating_sub(1);
        let legal = match (&self.state, &next) {
            (RunState::NotStarted, RunState::StepSubmitted { step }) => *step == 0,
            (RunState::StepSucceeded { step: done }, RunState::StepSubmitted { step }) => *step == done + 1,
            (RunState::StepSucceeded { step }, RunState::Succeeded) => *step == last,
            (RunState::StepSubmitted { step: a }, RunState::StepRunning { step: b })
            | (RunState::StepSubmitted { step: a }, RunState::StepSucceeded { step: b })
            | (RunState::StepRunning { step: a }, RunState::StepRunning { step: b })
            | (RunState::StepRunning { step: a }, RunState::StepSucceeded { step: b })
            | (RunState::StepSubmitted { step: a }, RunState::Failed { step: b, .. })
            | (RunState::StepRunning { step: a }, RunState::Failed { step: b, .. }) => a == b,
            _ => false,
        };
        if !legal {
            return Err(JobError::InvalidTransition(format!("run {}: {} -> {}", self.run_id, self.state, next)));
        }
        if let RunState::StepSubmitted { step } = next {
            self.current_step = step;
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Convierte el estado final del run en resultado: `Ok(())` si terminó
    /// bien, `JobTimeout` / `JobFailed` si falló.
    pub fn outcome(&self) -> Result<()> {
        match &self.state {
            RunState::Succeeded => Ok(()),
            RunState::Failed { step, status, reason } => {
                let job_id = self.jobs
                                 .get(*step)
                                 .and_then(|j| j.as_ref().map(|h| h.job_id.clone()))
                                 .unwrap_or_else(|| self.steps.get(*step).cloned().unwrap_or_default());
                if *status == JobStatus::Timeout {
                    Err(JobError::JobTimeout { job_id, waited: parse_waited(reason) })
                } else {
                    Err(JobError::JobFailed { job_id, reason: reason.clone() })
                }
            }
            other => Err(JobError::Other(format!("run {} aún en curso ({})", self.run_id, other))),
        }
    }
}

// El motivo de un TIMEOUT se guarda como "timeout after <ms>ms".
fn parse_waited(reason: &str) -> std::time::Duration {
    reason.strip_prefix("timeout after ")
          .and_then(|r| r.strip_suffix("ms"))
          .and_then(|ms| ms.parse::<u64>().ok())
          .map(std::time::Duration::from_millis)
          .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transitions_follow_step_order() {
        let mut run = PipelineRun::new("p", vec!["a".into(), "b".into()], json!({}));
        assert!(run.transition(RunState::StepSubmitted { step: 1 }).is_err());
        run.transition(RunState::StepSubmitted { step: 0 }).unwrap();
        run.transition(RunState::StepRunning { step: 0 }).unwrap();
        assert!(run.transition(RunState::Succeeded).is_err());
        run.transition(RunState::StepSucceeded { step: 0 }).unwrap();
        assert_eq!(run.next_step(), Some(1));
        run.transition(RunState::StepSubmitted { step: 1 }).unwrap();
        run.transition(RunState::StepSucceeded { step: 1 }).unwrap();
        assert_eq!(run.next_step(), None);
        run.transition(RunState::Succeeded).unwrap();
        assert!(run.outcome().is_ok());
    }

    #[test]
    fn failed_is_absorbing() {
        let mut run = PipelineRun::new("p", vec!["a".into()], json!({}));
        run.transition(RunState::StepSubmitted { step: 0 }).unwrap();
        run.transition(RunState::Failed { step: 0, status: JobStatus::Timeout, reason: "timeout after 1500ms".into() })
           .unwrap();
        assert!(run.transition(RunState::StepRunning { step: 0 }).is_err());
        match run.outcome() {
            Err(JobError::JobTimeout { waited, .. }) => assert_eq!(waited.as_millis(), 1500),
            other => panic!("esperaba JobTimeout, obtuve {:?}", other),
        }
    }

    #[test]
    fn record_is_in_flight_while_pending_or_running() {
        let mut rec = JobRecord::empty("p");
        assert!(!rec.in_flight());
        rec.job_kind = Some(JobKind::Import);
        rec.status = Some(JobStatus::Pending);
        assert!(rec.in_flight());
        rec.status = Some(JobStatus::Running);
        assert!(rec.in_flight());
        rec.status = Some(JobStatus::Succeeded);
        assert!(!rec.in_flight());
    }
}
