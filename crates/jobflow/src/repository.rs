// Archivo: repository.rs
// Propósito: definir el trait `JobRepository` (registro "latest" y runs) y el
// trait `ObjectStore` para el almacenamiento de objetos, junto con helpers
// de paginación y borrado por lotes.
use crate::domain::{JobRecord, PersistResult, PipelineRun};
use crate::errors::Result;
use async_trait::async_trait;
use log::info;
use uuid::Uuid;

/// Máximo de claves por llamada de borrado en lote.
pub const DELETE_BATCH_LIMIT: usize = 1000;

/// Contrato del almacén clave-valor que guarda el estado entre
/// invocaciones.
///
/// Los pasos se ejecutan en invocaciones separadas sin memoria compartida:
/// todo estado cruzado pasa por este repositorio.
pub trait JobRepository: Send + Sync {
    /// Lee el registro "latest" de la identidad de pipeline.
    fn get_record(&self, pipeline_id: &str) -> Result<Option<JobRecord>>;

    /// Escribe el registro incondicionalmente (last-writer-wins). Devuelve el
    /// registro con su nueva `version`.
    fn put_record(&self, record: &JobRecord) -> Result<JobRecord>;

    /// Escritura condicional: sólo escribe si la versión almacenada coincide
    /// con `expected_version` (`None` = el registro no debe existir).
    fn compare_and_put(&self, record: &JobRecord, expected_version: Option<i64>) -> Result<PersistResult>;

    /// Persiste un run nuevo. Falla con `Conflict` si el id ya existe.
    fn create_run(&self, run: &PipelineRun) -> Result<()>;

    /// Carga un run por id (`NotFound` si no existe).
    fn get_run(&self, run_id: &Uuid) -> Result<PipelineRun>;

    /// Guarda un run con control optimista de versión.
    fn save_run(&self, run: &PipelineRun, expected_version: i64) -> Result<PersistResult>;

    /// Lista los runs de una identidad de pipeline, más recientes primero.
    fn list_runs(&self, pipeline_id: &str) -> Result<Vec<PipelineRun>>;
}

/// Página de claves devuelta por `ObjectStore::list_page`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPage {
    pub keys: Vec<String>,
    /// Token de continuación; `None` en la última página.
    pub next_token: Option<String>,
}

/// Almacén de objetos (bucket + key).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn list_page(&self, bucket: &str, prefix: &str, next_token: Option<String>) -> Result<ObjectPage>;

    /// Borra hasta `DELETE_BATCH_LIMIT` claves en una llamada.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<()>;
}

/// Recorre todas las páginas bajo `prefix`.
pub async fn list_all_keys<S>(store: &S, bucket: &str, prefix: &str) -> Result<Vec<String>>
    where S: ObjectStore + ?Sized
{
    let mut keys = Vec::new();
    let mut token = None;
    loop {
        let page = store.list_page(bucket, prefix, token).await?;
        keys.extend(page.keys);
        match page.next_token {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    Ok(keys)
}

/// Borra todos los objetos bajo `prefix` que cumplan `filter`, en lotes de
/// `DELETE_BATCH_LIMIT`. Devuelve cuántos se borraron.
pub async fn delete_prefix<S, F>(store: &S, bucket: &str, prefix: &str, filter: F) -> Result<usize>
    where S: ObjectStore + ?Sized,
          F: Fn(&str) -> bool
{
    let keys: Vec<String> = list_all_keys(store, bucket, prefix).await?
                                                                .into_iter()
                                                                .filter(|k| filter(k))
                                                                .collect();
    if keys.is_empty() {
        info!("sin objetos existentes en s3://{}/{}", bucket, prefix);
        return Ok(0);
    }
    info!("borrando {} objetos de s3://{}/{}", keys.len(), bucket, prefix);
    for batch in keys.chunks(DELETE_BATCH_LIMIT) {
        store.delete_objects(bucket, batch).await?;
    }
    Ok(keys.len())
}

/// Copia cada objeto bajo `src_prefix` reemplazando el prefijo por
/// `dst_prefix`. Devuelve cuántos se copiaron.
pub async fn copy_prefix<S>(store: &S, bucket: &str, src_prefix: &str, dst_prefix: &str) -> Result<usize>
    where S: ObjectStore + ?Sized
{
    let keys = list_all_keys(store, bucket, src_prefix).await?;
    for key in &keys {
        let dst = format!("{}{}", dst_prefix, key.strip_prefix(src_prefix).unwrap_or(key));
        store.copy(bucket, key, &dst).await?;
    }
    info!("copiados {} objetos de {} a {}", keys.len(), src_prefix, dst_prefix);
    Ok(keys.len())
}
