//! Persistencia Diesel para el trait `jobflow::JobRepository`.
//! Expone el módulo `schema` y el repositorio `DieselJobRepository`; la
//! implementación está en `job_persistence.rs`.

mod job_persistence;
pub mod schema;

pub use job_persistence::{new_from_env, DieselJobRepository, MIGRATIONS};
