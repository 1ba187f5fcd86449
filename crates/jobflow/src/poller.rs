// Archivo: poller.rs
// Propósito: primitiva genérica "consultar estado hasta terminal" sobre
// cualquier tipo de job externo.
//
// El poller no conoce servicios concretos: recibe una capacidad
// `StatusFetcher` que devuelve el estado actual ya normalizado y un
// conjunto de estados considerados terminales.
use crate::domain::{JobHandle, JobStatus};
use crate::errors::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Motivo usado cuando el servicio reporta fallo sin explicación.
pub const UNKNOWN_REASON: &str = "Unknown reason";
/// Prefijo del motivo cuando se agotan los reintentos de consulta.
pub const EXHAUSTED_RETRIES: &str = "status check exhausted retries";

/// Estado devuelto por una consulta al servicio externo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: JobStatus,
    /// String original del servicio (para logs y mensajes).
    pub raw_status: String,
    pub failure_reason: Option<String>,
}

impl StatusSnapshot {
    pub fn new(status: JobStatus) -> Self {
        Self { status, raw_status: status.as_str().to_string(), failure_reason: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { status: JobStatus::Failed, raw_status: JobStatus::Failed.as_str().to_string(), failure_reason: Some(reason.into()) }
    }
}

/// Capacidad de consultar el estado actual de un job.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_status(&self, job: &JobHandle) -> Result<StatusSnapshot>;
}

/// Intervalo entre consultas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollInterval {
    Fixed(Duration),
    /// Backoff exponencial: `initial * factor^n`, acotado por `max`.
    Exponential { initial: Duration, max: Duration, factor: u32 },
}

impl PollInterval {
    /// Intervalo a esperar tras la consulta número `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            PollInterval::Fixed(d) => d,
            PollInterval::Exponential { initial, max, factor } => {
                let mult = factor.max(1).saturating_pow(attempt);
                initial.checked_mul(mult).map(|d| d.min(max)).unwrap_or(max)
            }
        }
    }
}

/// Presupuesto de espera del poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: PollInterval,
    /// Errores de consulta consecutivos tolerados antes de devolver FAILED.
    pub max_fetch_retries: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig { timeout: Duration::from_secs(3600),
                     interval: PollInterval::Fixed(Duration::from_secs(30)),
                     max_fetch_retries: 3 }
    }
}

/// Resultado terminal de `poll`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub status: JobStatus,
    pub failure_reason: Option<String>,
    /// Número de consultas realizadas (exitosas o no).
    pub polls: u32,
    pub elapsed: Duration,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Succeeded
    }
}

/// Resultado de una única consulta (modelo "dispara y consulta luego").
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: JobStatus,
    pub raw_status: String,
    pub is_completed: bool,
    pub failure_reason: Option<String>,
}

/// Consulta el estado de `job` hasta que esté en `terminal`, se agote
/// `config.timeout` (TIMEOUT) o fallen más de `config.max_fetch_retries`
/// consultas seguidas (FAILED).
///
/// Nunca devuelve error: los fallos de consulta se tratan como "pendiente"
/// dentro del presupuesto y luego se reportan como FAILED con motivo.
pub async fn poll<F>(job: &JobHandle, fetcher: &F, terminal: &[JobStatus], config: &PollConfig) -> PollOutcome
    where F: StatusFetcher + ?Sized
{
    let start = Instant::now();
    let mut polls: u32 = 0;
    let mut consecutive_errors: u32 = 0;

    loop {
        polls += 1;
        match fetcher.fetch_status(job).await {
            Ok(snapshot) => {
                consecutive_errors = 0;
                debug!("job {} ({}): estado {} (consulta {})", job.job_id, job.kind, snapshot.raw_status, polls);
                if terminal.contains(&snapshot.status) {
                    let failure_reason = match snapshot.status {
                        JobStatus::Failed | JobStatus::Cancelled => {
                            Some(snapshot.failure_reason.unwrap_or_else(|| UNKNOWN_REASON.to_string()))
                        }
                        _ => snapshot.failure_reason,
                    };
                    info!("job {} ({}) terminó con {} tras {} consultas", job.job_id, job.kind, snapshot.status, polls);
                    return PollOutcome { status: snapshot.status, failure_reason, polls, elapsed: start.elapsed() };
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!("job {} ({}): fallo consultando estado ({}/{}): {}",
                      job.job_id, job.kind, consecutive_errors, config.max_fetch_retries, e);
                if consecutive_errors > config.max_fetch_retries {
                    return PollOutcome { status: JobStatus::Failed,
                                         failure_reason: Some(format!("{}: {}", EXHAUSTED_RETRIES, e)),
                                         polls,
                                         elapsed: start.elapsed() };
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            warn!("job {} ({}): timeout tras {:?}", job.job_id, job.kind, elapsed);
            return PollOutcome { status: JobStatus::Timeout,
                                 failure_reason: Some(format!("timeout after {}ms", elapsed.as_millis())),
                                 polls,
                                 elapsed };
        }
        let remaining = config.timeout - elapsed;
        sleep(config.interval.delay(polls - 1).min(remaining)).await;
    }
}

/// Consulta el estado una sola vez. Los errores se propagan: quien invoca
/// decide si reintentar en una invocación posterior.
pub async fn check_once<F>(job: &JobHandle, fetcher: &F, terminal: &[JobStatus]) -> Result<CheckOutcome>
    where F: StatusFetcher + ?Sized
{
    let snapshot = fetcher.fetch_status(job).await?;
    let is_completed = terminal.contains(&snapshot.status);
    let failure_reason = match snapshot.status {
        JobStatus::Failed | JobStatus::Cancelled => {
            Some(snapshot.failure_reason.unwrap_or_else(|| UNKNOWN_REASON.to_string()))
        }
        _ => snapshot.failure_reason,
    };
    Ok(CheckOutcome { status: snapshot.status, raw_status: snapshot.raw_status, is_completed, failure_reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_is_capped() {
        let i = PollInterval::Exponential { initial: Duration::from_millis(500),
                                            max: Duration::from_millis(2000),
                                            factor: 2 };
        assert_eq!(i.delay(0), Duration::from_millis(500));
        assert_eq!(i.delay(1), Duration::from_millis(1000));
        assert_eq!(i.delay(2), Duration::from_millis(2000));
        assert_eq!(i.delay(40), Duration::from_millis(2000));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let i = PollInterval::Fixed(Duration::from_secs(5));
        assert_eq!(i.delay(0), i.delay(7));
    }
}
