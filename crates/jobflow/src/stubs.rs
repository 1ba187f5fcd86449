// Archivo: stubs.rs
// Propósito: implementaciones en memoria para pruebas y wiring rápido.
//
// Incluye un repositorio de jobs en memoria (`InMemoryJobRepository`), un
// almacén de objetos en memoria con paginación e inyección de fallos
// (`InMemoryObjectStore`) y un `StatusFetcher` guionado. No son durables.
use crate::domain::{JobHandle, JobRecord, PersistResult, PipelineRun};
use crate::errors::{JobError, Result};
use crate::poller::{StatusFetcher, StatusSnapshot};
use crate::repository::{JobRepository, ObjectPage, ObjectStore};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

fn lock<T>(m: &Mutex<T>) -> std::result::Result<MutexGuard<'_, T>, JobError> {
    m.lock().map_err(|e| JobError::Storage(format!("mutex poisoned: {:?}", e)))
}

/// Repositorio en memoria del registro "latest" y de los runs.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    records: Mutex<HashMap<String, JobRecord>>,
    runs: Mutex<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn get_record(&self, pipeline_id: &str) -> Result<Option<JobRecord>> {
        Ok(lock(&self.records)?.get(pipeline_id).cloned())
    }

    fn put_record(&self, record: &JobRecord) -> Result<JobRecord> {
        let mut records = lock(&self.records)?;
        let next = records.get(&record.pipeline_id).map(|r| r.version).unwrap_or(0) + 1;
        let mut stored = record.clone();
        stored.version = next;
        records.insert(stored.pipeline_id.clone(), stored.clone());
        Ok(stored)
    }

    fn compare_and_put(&self, record: &JobRecord, expected_version: Option<i64>) -> Result<PersistResult> {
        let mut records = lock(&self.records)?;
        let current = records.get(&record.pipeline_id).map(|r| r.version);
        if current != expected_version {
            return Ok(PersistResult::Conflict);
        }
        let new_version = current.unwrap_or(0) + 1;
        let mut stored = record.clone();
        stored.version = new_version;
        records.insert(stored.pipeline_id.clone(), stored);
        Ok(PersistResult::Ok { new_version })
    }

    fn create_run(&self, run: &PipelineRun) -> Result<()> {
        let mut runs = lock(&self.runs)?;
        if runs.contains_key(&run.run_id) {
            return Err(JobError::Conflict(format!("run {} ya existe", run.run_id)));
        }
        runs.insert(run.run_id, run.clone());
        Ok(())
    }

    fn get_run(&self, run_id: &Uuid) -> Result<PipelineRun> {
        lock(&self.runs)?.get(run_id)
                         .cloned()
                         .ok_or_else(|| JobError::NotFound(format!("run {}", run_id)))
    }

    fn save_run(&self, run: &PipelineRun, expected_version: i64) -> Result<PersistResult> {
        let mut runs = lock(&self.runs)?;
        let stored = runs.get_mut(&run.run_id)
                         .ok_or_else(|| JobError::NotFound(format!("run {}", run.run_id)))?;
        if stored.version != expected_version {
            return Ok(PersistResult::Conflict);
        }
        let new_version = expected_version + 1;
        *stored = run.clone();
        stored.version = new_version;
        Ok(PersistResult::Ok { new_version })
    }

    fn list_runs(&self, pipeline_id: &str) -> Result<Vec<PipelineRun>> {
        let mut out: Vec<PipelineRun> = lock(&self.runs)?.values()
                                                         .filter(|r| r.pipeline_id == pipeline_id)
                                                         .cloned()
                                                         .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

/// Objeto almacenado con su content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Almacén de objetos en memoria con páginas de tamaño configurable.
///
/// `fail_deletes` / `fail_puts` fuerzan errores para probar los caminos de
/// fallo de la materialización.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    page_size: usize,
    delete_batches: Mutex<Vec<usize>>,
    fail_deletes: AtomicBool,
    fail_puts: AtomicBool,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self { objects: Mutex::new(BTreeMap::new()),
               page_size: page_size.max(1),
               delete_batches: Mutex::new(Vec::new()),
               fail_deletes: AtomicBool::new(false),
               fail_puts: AtomicBool::new(false) }
    }

    /// Inserta un objeto directamente (semilla de pruebas).
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert((bucket.to_string(), key.to_string()),
                       StoredObject { body: body.into(), content_type: "application/octet-stream".to_string() });
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// Claves del bucket en orden lexicográfico.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.keys().filter(|(b, _)| b == bucket).map(|(_, k)| k.clone()).collect()
    }

    /// Tamaño de cada llamada a `delete_objects` realizada.
    pub fn delete_batches(&self) -> Vec<usize> {
        self.delete_batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(JobError::Storage(format!("put s3://{}/{} rechazado", bucket, key)));
        }
        lock(&self.objects)?.insert((bucket.to_string(), key.to_string()),
                                    StoredObject { body, content_type: content_type.to_string() });
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        lock(&self.objects)?.get(&(bucket.to_string(), key.to_string()))
                            .map(|o| o.body.clone())
                            .ok_or_else(|| JobError::NotFound(format!("s3://{}/{}", bucket, key)))
    }

    async fn list_page(&self, bucket: &str, prefix: &str, next_token: Option<String>) -> Result<ObjectPage> {
        let start = match next_token {
            Some(t) => t.parse::<usize>()
                        .map_err(|e| JobError::Storage(format!("token de continuación inválido '{}': {}", t, e)))?,
            None => 0,
        };
        let objects = lock(&self.objects)?;
        let matching: Vec<String> = objects.keys()
                                           .filter(|(b, k)| b == bucket && k.starts_with(prefix))
                                           .map(|(_, k)| k.clone())
                                           .collect();
        let end = (start + self.page_size).min(matching.len());
        let keys = matching.get(start..end).map(|s| s.to_vec()).unwrap_or_default();
        let next_token = if end < matching.len() { Some(end.to_string()) } else { None };
        Ok(ObjectPage { keys, next_token })
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(JobError::Storage(format!("delete en {} rechazado", bucket)));
        }
        if keys.len() > crate::repository::DELETE_BATCH_LIMIT {
            return Err(JobError::Storage(format!("lote de {} claves excede el límite", keys.len())));
        }
        let mut objects = lock(&self.objects)?;
        for k in keys {
            objects.remove(&(bucket.to_string(), k.clone()));
        }
        lock(&self.delete_batches)?.push(keys.len());
        Ok(())
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<()> {
        let mut objects = lock(&self.objects)?;
        let obj = objects.get(&(bucket.to_string(), src_key.to_string()))
                         .cloned()
                         .ok_or_else(|| JobError::NotFound(format!("s3://{}/{}", bucket, src_key)))?;
        objects.insert((bucket.to_string(), dst_key.to_string()), obj);
        Ok(())
    }
}

/// `StatusFetcher` que devuelve una secuencia guionada de respuestas.
///
/// `Err(msg)` se entrega como `TransientFetch`. Agotado el guion repite la
/// última respuesta. Registra el instante (reloj de tokio) de cada consulta.
#[derive(Debug)]
pub struct ScriptedStatusFetcher {
    script: Mutex<VecDeque<std::result::Result<StatusSnapshot, String>>>,
    last: Mutex<Option<std::result::Result<StatusSnapshot, String>>>,
    calls: AtomicU32,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedStatusFetcher {
    pub fn new(script: Vec<std::result::Result<StatusSnapshot, String>>) -> Self {
        Self { script: Mutex::new(script.into()),
               last: Mutex::new(None),
               calls: AtomicU32::new(0),
               call_times: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl StatusFetcher for ScriptedStatusFetcher {
    async fn fetch_status(&self, _job: &JobHandle) -> Result<StatusSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.call_times)?.push(Instant::now());
        let next = lock(&self.script)?.pop_front();
        let answer = match next {
            Some(a) => {
                *lock(&self.last)? = Some(a.clone());
                a
            }
            None => lock(&self.last)?.clone()
                                     .ok_or_else(|| JobError::Other("guion de estados vacío".to_string()))?,
        };
        answer.map_err(JobError::TransientFetch)
    }
}
