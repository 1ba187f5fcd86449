//! Crate `jobflow`: núcleo de orquestación de trabajos asíncronos
//!
//! Este crate define los tipos de dominio (`Job`, `JobRecord`,
//! `PipelineRun`), el contrato de persistencia `JobRepository`, el contrato
//! de almacenamiento de objetos `ObjectStore` e implementaciones en memoria
//! útiles para pruebas. Sobre esos contratos se construyen las tres piezas
//! del orquestador:
//!
//! - `poller`: primitiva genérica "consultar estado hasta terminal" con
//!   timeout, intervalo fijo o exponencial y reintentos acotados.
//! - `engine`: máquina de estados que secuencia pasos con nombre dentro de
//!   un `PipelineRun` persistido.
//! - `materializer`: convierte la salida cruda de un job terminado en un
//!   artefacto tabular durable (reemplazo completo).
//!
//! Diseño resumido:
//! - Estado entre invocaciones: todo lo que un paso necesita de pasos
//!   previos se lee del `PipelineRun` persistido, nunca de memoria.
//! - Duplicados: `JobService` rechaza enviar un job de un tipo que ya está
//!   RUNNING según el registro persistido (check-then-act, o CAS opcional).
//!
//! Ejemplo rápido:
//! ```rust
//! use jobflow::stubs::InMemoryJobRepository;
//! use jobflow::service::{JobService, SubmissionGuard};
//! use std::sync::Arc;
//! let repo = Arc::new(InMemoryJobRepository::new());
//! let service = JobService::new(repo, SubmissionGuard::Advisory);
//! assert!(service.latest("segment").unwrap().is_none());
//! ```
pub mod domain;
pub mod engine;
pub mod errors;
pub mod materializer;
pub mod poller;
pub mod repository;
pub mod service;
pub mod stubs;

pub use domain::*;
pub use engine::{PipelineEngine, PipelineEngineConfig, PipelineStep, RunContext, StepCheck, StepSubmission};
pub use errors::*;
pub use materializer::{ArtifactLocation, ArtifactSchema, MaterializeReport, Materializer, RecordMapper, SegmentRecordMapper,
                       SourceRecord};
pub use poller::{check_once, poll, CheckOutcome, PollConfig, PollInterval, PollOutcome, StatusFetcher, StatusSnapshot};
pub use repository::{copy_prefix, delete_prefix, list_all_keys, JobRepository, ObjectPage, ObjectStore, DELETE_BATCH_LIMIT};
pub use service::{JobService, SubmissionGuard};
