//! segment-workflow: pipeline concreto de segmentos sobre `jobflow`
//!
//! Define los contratos de los servicios externos (catálogo, motor de
//! consultas, servicio de recomendaciones, resolución de entidades,
//! lanzador de workflows), la normalización de sus estados, los pasos
//! concretos del pipeline y los dos flujos que los secuencian:
//!
//! - `data-integration`: resolución de identidades, actualización del
//!   cliente integrado, importación, entrenamiento, versión, segmento y
//!   materialización.
//! - `segment`: sólo segmento y materialización, con la versión de
//!   solución ya entrenada.
//!
//! `segment_tool` expone las dos operaciones de cara al agente (iniciar un
//! segmento por ítems y consultar su estado) y `catalog`/`query` las
//! utilidades de exploración de datos.

pub mod catalog;
pub mod clients;
pub mod config;
pub mod errors;
pub mod flows;
pub mod query;
pub mod segment_tool;
pub mod status;
pub mod steps;
pub mod stubs;
pub mod workflow_type;

pub use clients::{CatalogService, EntityResolutionService, QueryEngine, RecommendationService, Services, WorkflowLauncher};
pub use config::PipelineConfig;
pub use errors::WorkflowError;
pub use flows::{build_engine, data_integration_steps, segment_steps, LocalLauncher};
pub use segment_tool::SegmentTool;
pub use workflow_type::WorkflowType;
