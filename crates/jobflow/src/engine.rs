// Archivo: engine.rs
// Propósito: implementar `PipelineEngine`, la máquina de estados que
// secuencia pasos con nombre dentro de un `PipelineRun` persistido.
//
// Cada operación del motor carga el run del repositorio, aplica una
// transición y lo guarda con control optimista de versión: el motor puede
// ejecutarse en invocaciones separadas sin memoria compartida.
use crate::domain::{Job, JobHandle, JobKind, JobRecord, JobStatus, PersistResult, PipelineRun, RunState};
use crate::errors::{JobError, Result};
use crate::poller::{check_once, poll, PollConfig, StatusFetcher, StatusSnapshot};
use crate::repository::JobRepository;
use crate::service::{JobService, SubmissionGuard};
use async_trait::async_trait;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use uuid::Uuid;

/// Resultado de `PipelineStep::submit`.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSubmission {
    /// Se envió un job externo que hay que esperar.
    Job(JobHandle),
    /// El paso terminó en la misma invocación con esta salida.
    Completed(JsonValue),
}

/// Contrato de un paso del pipeline.
///
/// Un paso con `kind()` envía un job externo (protegido contra duplicados
/// por `JobService`); sin `kind()` el paso es local y devuelve su salida
/// con `StepSubmission::Completed`.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Nombre estable del paso; clave de su salida en el run.
    fn name(&self) -> &str;

    fn kind(&self) -> Option<JobKind> {
        None
    }

    /// Envía el trabajo del paso. Las dependencias se leen de `ctx`.
    async fn submit(&self, ctx: &RunContext) -> Result<StepSubmission>;

    /// Estado normalizado del job enviado.
    async fn fetch_status(&self, job: &JobHandle) -> Result<StatusSnapshot> {
        let _ = job;
        Ok(StatusSnapshot::new(JobStatus::Succeeded))
    }

    fn is_success(&self, status: JobStatus) -> bool {
        status == JobStatus::Succeeded
    }

    /// Salida persistida cuando el job termina bien: `params` del job más su
    /// `jobId`.
    fn output(&self, job: &JobHandle) -> JsonValue {
        let mut out = job.params.clone();
        match out.as_object_mut() {
            Some(obj) => {
                obj.insert("jobId".to_string(), json!(job.job_id));
                out
            }
            None => json!({ "jobId": job.job_id, "params": job.params }),
        }
    }
}

struct StepFetcher<'a>(&'a dyn PipelineStep);

#[async_trait]
impl<'a> StatusFetcher for StepFetcher<'a> {
    async fn fetch_status(&self, job: &JobHandle) -> Result<StatusSnapshot> {
        self.0.fetch_status(job).await
    }
}

/// Contexto de un paso: acceso a la entrada y a las salidas de pasos
/// previos, siempre leídas del run persistido.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub pipeline_id: String,
    pub step_index: usize,
    repo: Arc<dyn JobRepository>,
}

impl RunContext {
    pub fn new(run_id: Uuid, pipeline_id: impl Into<String>, step_index: usize, repo: Arc<dyn JobRepository>) -> Self {
        Self { run_id, pipeline_id: pipeline_id.into(), step_index, repo }
    }

    /// Salida cruda persistida por `step_name` (o `"input"`).
    pub fn get_output(&self, step_name: &str) -> Result<Option<JsonValue>> {
        let run = self.repo.get_run(&self.run_id)?;
        Ok(run.outputs.get(step_name).cloned())
    }

    /// Salida de `step_name` deserializada a `T`.
    pub fn get_typed_output<T>(&self, step_name: &str) -> Result<Option<T>>
        where T: DeserializeOwned
    {
        match self.get_output(step_name)? {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    /// Igual que `get_typed_output` pero falla con `MissingParameter` si el
    /// paso no dejó salida.
    pub fn require_output<T>(&self, step_name: &str) -> Result<T>
        where T: DeserializeOwned
    {
        self.get_typed_output(step_name)?
            .ok_or_else(|| JobError::MissingParameter(format!("salida de '{}' en run {}", step_name, self.run_id)))
    }

    /// Entrada del run deserializada a `T`.
    pub fn input<T>(&self) -> Result<T>
        where T: DeserializeOwned
    {
        self.require_output("input")
    }

    /// Registro "latest" de la identidad de pipeline del run.
    pub fn latest_record(&self) -> Result<Option<JobRecord>> {
        self.repo.get_record(&self.pipeline_id)
    }
}

/// Configuración del motor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineEngineConfig {
    /// Presupuesto de espera de `wait_current`.
    pub poll: PollConfig,
}

/// Resultado de `check_current`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCheck {
    pub run: PipelineRun,
    /// Estado del job consultado, o el estado global del run si no había job
    /// que consultar.
    pub status: JobStatus,
    /// Job consultado con su estado; `None` si no había nada que consultar.
    pub job: Option<Job>,
    /// `true` si el paso actual ya no necesita más consultas.
    pub is_completed: bool,
}

/// Motor que ejecuta un pipeline de pasos sobre un `JobRepository`.
pub struct PipelineEngine<R>
    where R: JobRepository + 'static
{
    repo: Arc<R>,
    jobs: JobService<R>,
    steps: Vec<Arc<dyn PipelineStep>>,
    config: PipelineEngineConfig,
}

impl<R> PipelineEngine<R> where R: JobRepository + 'static
{
    pub fn new(repo: Arc<R>, guard: SubmissionGuard, steps: Vec<Arc<dyn PipelineStep>>, config: PipelineEngineConfig) -> Self {
        let jobs = JobService::new(repo.clone(), guard);
        Self { repo, jobs, steps, config }
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn jobs(&self) -> &JobService<R> {
        &self.jobs
    }

    pub fn config(&self) -> &PipelineEngineConfig {
        &self.config
    }

    /// Crea y persiste un run nuevo en `NotStarted` con `input` como entrada.
    pub fn start_run(&self, pipeline_id: &str, input: JsonValue) -> Result<PipelineRun> {
        if self.steps.is_empty() {
            return Err(JobError::InvalidTransition(format!("pipeline {} sin pasos", pipeline_id)));
        }
        let run = PipelineRun::new(pipeline_id, self.step_names(), input);
        self.repo.create_run(&run)?;
        info!("run {} creado para {} con pasos {:?}", run.run_id, pipeline_id, run.steps);
        Ok(run)
    }

    pub fn load_run(&self, run_id: &Uuid) -> Result<PipelineRun> {
        self.repo.get_run(run_id)
    }

    /// Runs de `pipeline_id`, más recientes primero.
    pub fn runs(&self, pipeline_id: &str) -> Result<Vec<PipelineRun>> {
        self.repo.list_runs(pipeline_id)
    }

    /// Envía el siguiente paso del run. Los pasos locales se completan en la
    /// misma llamada.
    ///
    /// Un `DuplicateInFlightJob` deja el run sin cambios; cualquier otro error
    /// de envío deja el run en `Failed` y se propaga.
    pub async fn submit_current(&self, run_id: &Uuid) -> Result<PipelineRun> {
        let mut run = self.load_run(run_id)?;
        let idx = run.next_step()
                     .ok_or_else(|| JobError::InvalidTransition(format!("run {} no admite envío en {}", run.run_id, run.state)))?;
        let step = self.step_at(&run, idx)?;
        let ctx = self.context(&run, idx);

        let submission = match step.kind() {
            Some(kind) => {
                let step_ref = step.as_ref();
                let ctx_ref = &ctx;
                let params = json!({ "runId": run.run_id, "step": step.name() });
                self.jobs
                    .submit(&run.pipeline_id, kind, params, move || async move {
                        match step_ref.submit(ctx_ref).await? {
                            StepSubmission::Job(handle) => Ok(handle),
                            StepSubmission::Completed(_) => {
                                Err(JobError::Other(format!("el paso {} no envió job", step_ref.name())))
                            }
                        }
                    })
                    .await
                    .map(StepSubmission::Job)
            }
            None => step.submit(&ctx).await,
        };

        match submission {
            Ok(StepSubmission::Job(handle)) => {
                run.transition(RunState::StepSubmitted { step: idx })?;
                info!("run {}: paso {} envió job {} ({})", run.run_id, step.name(), handle.job_id, handle.kind);
                run.jobs[idx] = Some(handle);
                self.save(&mut run)?;
                Ok(run)
            }
            Ok(StepSubmission::Completed(output)) => {
                run.transition(RunState::StepSubmitted { step: idx })?;
                run.outputs.insert(step.name().to_string(), output);
                self.complete_step(&mut run, idx)?;
                self.save(&mut run)?;
                Ok(run)
            }
            Err(e @ JobError::DuplicateInFlightJob { .. }) => Err(e),
            Err(e) => {
                warn!("run {}: paso {} falló al enviar: {}", run.run_id, step.name(), e);
                run.transition(RunState::StepSubmitted { step: idx })?;
                run.transition(RunState::Failed { step: idx, status: JobStatus::Failed, reason: e.to_string() })?;
                self.save(&mut run)?;
                Err(e)
            }
        }
    }

    /// Consulta una sola vez el job del paso actual y aplica el estado al run.
    pub async fn check_current(&self, run_id: &Uuid) -> Result<StepCheck> {
        let mut run = self.load_run(run_id)?;
        let idx = match run.state {
            RunState::StepSubmitted { step } | RunState::StepRunning { step } => step,
            RunState::NotStarted => {
                return Err(JobError::InvalidTransition(format!("run {} no tiene pasos enviados", run.run_id)));
            }
            _ => return Ok(StepCheck { status: run.status(), run, job: None, is_completed: true }),
        };
        let step = self.step_at(&run, idx)?;
        let handle = self.handle_at(&run, idx)?;

        let check = check_once(&handle, &StepFetcher(step.as_ref()), &JobStatus::TERMINAL).await?;
        let job = Job::from_handle(&handle, check.status, check.failure_reason.clone());
        self.apply_status(&mut run, idx, step.as_ref(), &handle, check.status, check.failure_reason)?;
        self.save(&mut run)?;
        Ok(StepCheck { run, status: check.status, job: Some(job), is_completed: check.is_completed })
    }

    /// Espera con el poller a que el job del paso actual termine y aplica el
    /// resultado (incluido TIMEOUT) al run.
    pub async fn wait_current(&self, run_id: &Uuid) -> Result<PipelineRun> {
        let run = self.load_run(run_id)?;
        let idx = match run.state {
            RunState::StepSubmitted { step } | RunState::StepRunning { step } => step,
            _ => return Ok(run),
        };
        let step = self.step_at(&run, idx)?;
        let handle = self.handle_at(&run, idx)?;

        let outcome = poll(&handle, &StepFetcher(step.as_ref()), &JobStatus::TERMINAL, &self.config.poll).await;

        // Otra invocación pudo avanzar el run mientras se esperaba.
        let mut run = self.load_run(run_id)?;
        match run.state {
            RunState::StepSubmitted { step } | RunState::StepRunning { step } if step == idx => {}
            _ => return Ok(run),
        }
        self.apply_status(&mut run, idx, step.as_ref(), &handle, outcome.status, outcome.failure_reason)?;
        self.save(&mut run)?;
        Ok(run)
    }

    /// Ejecuta el run hasta `Succeeded` o `Failed`, enviando y esperando cada
    /// paso en orden.
    pub async fn run_to_completion(&self, run_id: &Uuid) -> Result<PipelineRun> {
        loop {
            let run = self.load_run(run_id)?;
            match run.state {
                RunState::Succeeded | RunState::Failed { .. } => return Ok(run),
                RunState::StepSubmitted { .. } | RunState::StepRunning { .. } => {
                    self.wait_current(run_id).await?;
                }
                RunState::NotStarted | RunState::StepSucceeded { .. } => {
                    self.submit_current(run_id).await?;
                }
            }
        }
    }

    fn apply_status(&self,
                    run: &mut PipelineRun,
                    idx: usize,
                    step: &dyn PipelineStep,
                    handle: &JobHandle,
                    status: JobStatus,
                    failure_reason: Option<String>)
                    -> Result<()> {
        if status.is_terminal() {
            self.jobs.record_status(&run.pipeline_id, &handle.job_id, status, failure_reason.clone())?;
            if step.is_success(status) {
                run.outputs.insert(step.name().to_string(), step.output(handle));
                self.complete_step(run, idx)
            } else {
                let reason = failure_reason.unwrap_or_else(|| status.to_string());
                warn!("run {}: paso {} terminó con {}: {}", run.run_id, step.name(), status, reason);
                run.transition(RunState::Failed { step: idx, status, reason })
            }
        } else if status == JobStatus::Running {
            if matches!(run.state, RunState::StepSubmitted { .. }) {
                self.jobs.record_status(&run.pipeline_id, &handle.job_id, status, None)?;
            }
            run.transition(RunState::StepRunning { step: idx })
        } else {
            Ok(())
        }
    }

    fn complete_step(&self, run: &mut PipelineRun, idx: usize) -> Result<()> {
        run.transition(RunState::StepSucceeded { step: idx })?;
        if idx + 1 == run.steps.len() {
            run.transition(RunState::Succeeded)?;
            info!("run {} completado", run.run_id);
        }
        Ok(())
    }

    fn save(&self, run: &mut PipelineRun) -> Result<()> {
        match self.repo.save_run(run, run.version)? {
            PersistResult::Ok { new_version } => {
                run.version = new_version;
                Ok(())
            }
            PersistResult::Conflict => {
                Err(JobError::Conflict(format!("run {} modificado por otra invocación (version {})", run.run_id, run.version)))
            }
        }
    }

    fn step_at(&self, run: &PipelineRun, idx: usize) -> Result<Arc<dyn PipelineStep>> {
        let step = self.steps
                       .get(idx)
                       .ok_or_else(|| JobError::NotFound(format!("paso {} del run {}", idx, run.run_id)))?;
        if run.steps.get(idx).map(String::as_str) != Some(step.name()) {
            return Err(JobError::InvalidTransition(format!("run {} fue creado con otros pasos: {:?}", run.run_id, run.steps)));
        }
        Ok(step.clone())
    }

    fn handle_at(&self, run: &PipelineRun, idx: usize) -> Result<JobHandle> {
        run.jobs
           .get(idx)
           .cloned()
           .flatten()
           .ok_or_else(|| JobError::NotFound(format!("job del paso {} en run {}", idx, run.run_id)))
    }

    fn context(&self, run: &PipelineRun, idx: usize) -> RunContext {
        let repo: Arc<dyn JobRepository> = self.repo.clone();
        RunContext::new(run.run_id, run.pipeline_id.clone(), idx, repo)
    }
}
