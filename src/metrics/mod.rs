//! # Sistema de Métricas
//! src/metrics/mod.rs
//!
//! Recolección en memoria de:
//! - Requests por acción y faults por tipo
//! - Latencias (p50, p95, p99)
//! - Conexiones activas

pub mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};
