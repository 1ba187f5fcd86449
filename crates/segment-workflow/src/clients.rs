// clients.rs
//
// Contratos de los servicios externos que usa el pipeline. Todos son
// asíncronos y devuelven los estados tal como los reporta cada servicio;
// la traducción a `JobStatus` vive en `status.rs`.
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use jobflow::{JobKind, ObjectStore};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Tabla del catálogo (nombre y descripción opcional).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub comment: Option<String>,
}

/// Esquema completo de una tabla.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub description: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub partition_keys: Vec<ColumnInfo>,
    pub parameters: IndexMap<String, String>,
}

#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>>;

    /// `None` si la tabla no existe.
    async fn describe_table(&self, database: &str, table: &str) -> Result<Option<TableDescription>>;
}

/// Estado de una ejecución del motor de consultas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExecutionStatus {
    /// QUEUED, RUNNING, SUCCEEDED, FAILED o CANCELLED.
    pub state: String,
    pub state_change_reason: Option<String>,
    /// Ubicación del archivo de resultados (s3://bucket/key).
    pub output_location: Option<String>,
}

/// Página de resultados. La primera fila de la primera página es la
/// cabecera; `None` representa NULL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResultPage {
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Envía la consulta y devuelve el id de ejecución.
    async fn submit_query(&self, sql: &str, database: &str, output_location: &str) -> Result<String>;

    async fn get_status(&self, execution_id: &str) -> Result<QueryExecutionStatus>;

    async fn get_results(&self, execution_id: &str, next_token: Option<String>) -> Result<ResultPage>;
}

/// Estado crudo de un job del servicio de recomendaciones o de resolución
/// de entidades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceJobStatus {
    pub status: String,
    pub failure_reason: Option<String>,
}

impl ServiceJobStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self { status: status.into(), failure_reason: None }
    }

    pub fn failed(status: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { status: status.into(), failure_reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionSummary {
    pub arn: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolutionPage {
    pub solutions: Vec<SolutionSummary>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait RecommendationService: Send + Sync {
    /// Crea un job del tipo indicado y devuelve su ARN. `params` lleva los
    /// campos propios de cada tipo (nombre, rutas de entrada/salida, etc.).
    async fn create_job(&self, kind: JobKind, params: &JsonValue) -> Result<String>;

    async fn describe_job(&self, kind: JobKind, arn: &str) -> Result<ServiceJobStatus>;

    async fn list_solutions_page(&self, dataset_group_arn: &str, next_token: Option<String>) -> Result<SolutionPage>;

    async fn delete_solution(&self, arn: &str) -> Result<()>;
}

/// Todas las soluciones del dataset group, más recientes primero.
pub async fn list_solutions(service: &dyn RecommendationService, dataset_group_arn: &str) -> Result<Vec<SolutionSummary>> {
    let mut out = Vec::new();
    let mut token = None;
    loop {
        let page = service.list_solutions_page(dataset_group_arn, token).await?;
        out.extend(page.solutions);
        match page.next_token {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(out)
}

#[async_trait]
pub trait EntityResolutionService: Send + Sync {
    /// Inicia el job de matching del workflow y devuelve su id.
    async fn start_job(&self, workflow: &str) -> Result<String>;

    async fn get_job(&self, workflow: &str, job_id: &str) -> Result<ServiceJobStatus>;
}

/// Lanzador asíncrono de workflows (mensajería / invocación diferida).
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    /// Inicia una ejecución del workflow `name` y devuelve su id.
    async fn start_execution(&self, name: &str, input: JsonValue) -> Result<String>;
}

/// Clientes compartidos por los pasos concretos.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn CatalogService>,
    pub query: Arc<dyn QueryEngine>,
    pub recommendation: Arc<dyn RecommendationService>,
    pub entity_resolution: Arc<dyn EntityResolutionService>,
    pub store: Arc<dyn ObjectStore>,
}
