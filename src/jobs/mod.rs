//! # Sistema de Jobs
//! src/jobs/mod.rs
//!
//! Registro de trabajos de traducción y su ciclo de vida:
//!
//! - `types`: `Job`, `JobStatus`, `LanguagePair`
//! - `registry`: mapa concurrente `id → Job` con visibilidad por dueño
//! - `sweeper`: expiración periódica de jobs viejos

pub mod registry;
pub mod sweeper;
pub mod types;

pub use registry::{Listing, Registry, RegistryError};
pub use sweeper::Sweeper;
pub use types::{Job, JobId, JobStatus, LanguagePair, NewJob, ADMIN_USER};
