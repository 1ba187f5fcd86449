// stubs.rs
//
// Servicios externos falsos, en memoria, para pruebas y para el modo de
// simulación del binario. Escriben y leen sobre un `InMemoryObjectStore`
// compartido para que los pasos encadenen datos reales.
use crate::clients::{CatalogService, EntityResolutionService, QueryEngine, QueryExecutionStatus, RecommendationService,
                     ResultPage, ServiceJobStatus, SolutionPage, SolutionSummary, TableDescription, TableInfo,
                     WorkflowLauncher};
use crate::errors::{Result, WorkflowError};
use crate::query::parse_s3_uri;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use jobflow::stubs::InMemoryObjectStore;
use jobflow::JobKind;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock().map_err(|e| WorkflowError::Service(format!("mutex poisoned: {:?}", e)))
}

/// Catálogo con tablas fijas.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    tables: Mutex<IndexMap<String, TableDescription>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, table: TableDescription) -> Self {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.name.clone(), table);
        self
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn list_tables(&self, _database: &str) -> Result<Vec<TableInfo>> {
        Ok(lock(&self.tables)?.values()
                              .map(|t| TableInfo { name: t.name.clone(), description: t.description.clone() })
                              .collect())
    }

    async fn describe_table(&self, _database: &str, table: &str) -> Result<Option<TableDescription>> {
        Ok(lock(&self.tables)?.get(table).cloned())
    }
}

#[derive(Debug, Clone)]
struct FakeExecution {
    sql: String,
    result_location: String,
    rows: Vec<Vec<Option<String>>>,
    polls: u32,
}

/// Motor de consultas que responde con filas predefinidas según un
/// fragmento del SQL. Al enviar escribe el CSV de resultados (con comillas,
/// como el servicio real) en el almacén compartido.
#[derive(Debug)]
pub struct FakeQueryEngine {
    store: Arc<InMemoryObjectStore>,
    results: Mutex<Vec<(String, Vec<Vec<Option<String>>>)>>,
    executions: Mutex<HashMap<String, FakeExecution>>,
    running_polls: u32,
    failure: Mutex<Option<String>>,
    page_size: usize,
    counter: AtomicU32,
}

impl FakeQueryEngine {
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self { store,
               results: Mutex::new(Vec::new()),
               executions: Mutex::new(HashMap::new()),
               running_polls: 1,
               failure: Mutex::new(None),
               page_size: 1000,
               counter: AtomicU32::new(0) }
    }

    /// Consultas cuyo SQL contiene `needle` devuelven `header` + `rows`.
    pub fn with_result(self, needle: &str, header: &[&str], rows: Vec<Vec<&str>>) -> Self {
        let mut all = vec![header.iter().map(|c| Some(c.to_string())).collect::<Vec<_>>()];
        all.extend(rows.into_iter().map(|r| r.into_iter().map(|c| Some(c.to_string())).collect()));
        self.results.lock().unwrap_or_else(|e| e.into_inner()).push((needle.to_string(), all));
        self
    }

    /// Consultas RUNNING antes de terminar.
    pub fn with_running_polls(mut self, polls: u32) -> Self {
        self.running_polls = polls;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Las ejecuciones siguientes terminan en FAILED con `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason.into());
    }

    pub fn submitted_sql(&self) -> Vec<String> {
        let execs = self.executions.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<(u32, String)> = execs.iter()
                                               .filter_map(|(id, e)| id.trim_start_matches("q-").parse().ok().map(|n| (n, e.sql.clone())))
                                               .collect();
        out.sort();
        out.into_iter().map(|(_, sql)| sql).collect()
    }
}

fn quoted_csv(rows: &[Vec<Option<String>>]) -> String {
    rows.iter()
        .map(|r| {
            r.iter()
             .map(|c| format!("\"{}\"", c.as_deref().unwrap_or("").replace('"', "\"\"")))
             .collect::<Vec<_>>()
             .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl QueryEngine for FakeQueryEngine {
    async fn submit_query(&self, sql: &str, _database: &str, output_location: &str) -> Result<String> {
        let id = format!("q-{}", self.counter.fetch_add(1, Ordering::SeqCst));
        let rows = lock(&self.results)?.iter()
                                       .find(|(needle, _)| sql.contains(needle.as_str()))
                                       .map(|(_, rows)| rows.clone())
                                       .unwrap_or_default();
        let result_location = format!("{}{}.csv", output_location, id);
        let (bucket, key) = parse_s3_uri(&result_location)?;
        self.store.insert(&bucket, &key, quoted_csv(&rows));
        lock(&self.executions)?.insert(id.clone(), FakeExecution { sql: sql.to_string(), result_location, rows, polls: 0 });
        Ok(id)
    }

    async fn get_status(&self, execution_id: &str) -> Result<QueryExecutionStatus> {
        let failure = lock(&self.failure)?.clone();
        let mut execs = lock(&self.executions)?;
        let exec = execs.get_mut(execution_id)
                        .ok_or_else(|| WorkflowError::Service(format!("ejecución desconocida: {}", execution_id)))?;
        exec.polls += 1;
        if let Some(reason) = failure {
            return Ok(QueryExecutionStatus { state: "FAILED".into(), state_change_reason: Some(reason), output_location: None });
        }
        let state = if exec.polls <= self.running_polls { "RUNNING" } else { "SUCCEEDED" };
        Ok(QueryExecutionStatus { state: state.into(),
                                  state_change_reason: None,
                                  output_location: Some(exec.result_location.clone()) })
    }

    async fn get_results(&self, execution_id: &str, next_token: Option<String>) -> Result<ResultPage> {
        let execs = lock(&self.executions)?;
        let exec = execs.get(execution_id)
                        .ok_or_else(|| WorkflowError::Service(format!("ejecución desconocida: {}", execution_id)))?;
        let start = next_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(exec.rows.len());
        let rows = exec.rows.get(start..end).map(|r| r.to_vec()).unwrap_or_default();
        let next_token = if end < exec.rows.len() { Some(end.to_string()) } else { None };
        Ok(ResultPage { rows, next_token })
    }
}

/// Servicio de recomendaciones con estados guionados por tipo de job.
///
/// Agotado el guion de un tipo se repite su última respuesta; sin guion
/// todo job está ACTIVE. Con `with_segment_output` los jobs de segmentos
/// escriben su salida `.json.out` a partir de la entrada, asignando
/// `users` a cada ítem.
#[derive(Debug)]
pub struct FakeRecommendationService {
    created: Mutex<Vec<(JobKind, JsonValue)>>,
    scripts: Mutex<HashMap<JobKind, VecDeque<ServiceJobStatus>>>,
    solutions: Mutex<Vec<SolutionSummary>>,
    deleted: Mutex<Vec<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    segment_output: Option<(Arc<InMemoryObjectStore>, Vec<String>)>,
    page_size: usize,
    counter: AtomicU32,
}

impl Default for FakeRecommendationService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRecommendationService {
    pub fn new() -> Self {
        Self { created: Mutex::new(Vec::new()),
               scripts: Mutex::new(HashMap::new()),
               solutions: Mutex::new(Vec::new()),
               deleted: Mutex::new(Vec::new()),
               failing_deletes: Mutex::new(HashSet::new()),
               segment_output: None,
               page_size: 2,
               counter: AtomicU32::new(0) }
    }

    pub fn with_segment_output(mut self, store: Arc<InMemoryObjectStore>, users: &[&str]) -> Self {
        self.segment_output = Some((store, users.iter().map(|u| u.to_string()).collect()));
        self
    }

    pub fn script(&self, kind: JobKind, statuses: Vec<ServiceJobStatus>) {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner()).insert(kind, statuses.into());
    }

    /// Solución existente creada `age_days` días atrás.
    pub fn add_solution(&self, arn: &str, age_days: i64) {
        self.solutions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SolutionSummary { arn: arn.to_string(),
                                    name: arn.rsplit('/').next().unwrap_or(arn).to_string(),
                                    created_at: Utc::now() - ChronoDuration::days(age_days),
                                    status: "ACTIVE".to_string() });
    }

    pub fn fail_delete_of(&self, arn: &str) {
        self.failing_deletes.lock().unwrap_or_else(|e| e.into_inner()).insert(arn.to_string());
    }

    pub fn created(&self) -> Vec<(JobKind, JsonValue)> {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn solution_arns(&self) -> Vec<String> {
        self.solutions.lock().unwrap_or_else(|e| e.into_inner()).iter().map(|s| s.arn.clone()).collect()
    }

    fn write_segment_output(&self, params: &JsonValue) -> Result<()> {
        let Some((store, users)) = &self.segment_output else {
            return Ok(());
        };
        let param = |name: &str| {
            params.get(name)
                  .and_then(|v| v.as_str())
                  .ok_or_else(|| WorkflowError::Validation(format!("{} ausente en el job de segmentos", name)))
        };
        let (in_bucket, in_key) = parse_s3_uri(param("inputPath")?)?;
        let (out_bucket, out_prefix) = parse_s3_uri(param("outputPath")?)?;
        let input = store.object(&in_bucket, &in_key)
                         .ok_or_else(|| WorkflowError::Service(format!("entrada inexistente: {}", in_key)))?;
        let text = String::from_utf8(input.body).map_err(|e| WorkflowError::Validation(e.to_string()))?;
        let mut lines = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let item: JsonValue = serde_json::from_str(line)?;
            lines.push(json!({ "input": item, "output": { "usersList": users } }).to_string());
        }
        let file = in_key.rsplit('/').next().unwrap_or("input.json");
        store.insert(&out_bucket, &format!("{}{}.out", out_prefix, file), lines.join("\n"));
        Ok(())
    }
}

#[async_trait]
impl RecommendationService for FakeRecommendationService {
    async fn create_job(&self, kind: JobKind, params: &JsonValue) -> Result<String> {
        let arn = format!("arn:fake:{}/{}", kind, self.counter.fetch_add(1, Ordering::SeqCst));
        lock(&self.created)?.push((kind, params.clone()));
        match kind {
            JobKind::TrainSolution => {
                let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("solution").to_string();
                lock(&self.solutions)?.push(SolutionSummary { arn: arn.clone(),
                                                              name,
                                                              created_at: Utc::now(),
                                                              status: "CREATE IN_PROGRESS".to_string() });
            }
            JobKind::BatchSegment => self.write_segment_output(params)?,
            _ => {}
        }
        Ok(arn)
    }

    async fn describe_job(&self, kind: JobKind, _arn: &str) -> Result<ServiceJobStatus> {
        let mut scripts = lock(&self.scripts)?;
        let status = match scripts.get_mut(&kind) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(status.unwrap_or_else(|| ServiceJobStatus::new("ACTIVE")))
    }

    async fn list_solutions_page(&self, _dataset_group_arn: &str, next_token: Option<String>) -> Result<SolutionPage> {
        let solutions = lock(&self.solutions)?;
        let start = next_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(solutions.len());
        let page = solutions.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let next_token = if end < solutions.len() { Some(end.to_string()) } else { None };
        Ok(SolutionPage { solutions: page, next_token })
    }

    async fn delete_solution(&self, arn: &str) -> Result<()> {
        if lock(&self.failing_deletes)?.contains(arn) {
            return Err(WorkflowError::Service(format!("no se puede borrar {}: en uso", arn)));
        }
        lock(&self.solutions)?.retain(|s| s.arn != arn);
        lock(&self.deleted)?.push(arn.to_string());
        Ok(())
    }
}

/// Resolución de entidades con estados guionados.
#[derive(Debug, Default)]
pub struct FakeEntityResolution {
    script: Mutex<VecDeque<ServiceJobStatus>>,
    started: Mutex<Vec<String>>,
}

impl FakeEntityResolution {
    pub fn new(script: Vec<ServiceJobStatus>) -> Self {
        Self { script: Mutex::new(script.into()), started: Mutex::new(Vec::new()) }
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl EntityResolutionService for FakeEntityResolution {
    async fn start_job(&self, workflow: &str) -> Result<String> {
        let mut started = lock(&self.started)?;
        started.push(workflow.to_string());
        Ok(format!("er-job-{}", started.len()))
    }

    async fn get_job(&self, _workflow: &str, _job_id: &str) -> Result<ServiceJobStatus> {
        let mut script = lock(&self.script)?;
        let status = if script.len() > 1 { script.pop_front() } else { script.front().cloned() };
        Ok(status.unwrap_or_else(|| ServiceJobStatus::new("SUCCEEDED")))
    }
}

/// Lanzador que sólo registra las ejecuciones pedidas.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    calls: Mutex<Vec<(String, JsonValue)>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, JsonValue)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl WorkflowLauncher for RecordingLauncher {
    async fn start_execution(&self, name: &str, input: JsonValue) -> Result<String> {
        let mut calls = lock(&self.calls)?;
        calls.push((name.to_string(), input));
        Ok(format!("exec-{}", calls.len()))
    }
}
