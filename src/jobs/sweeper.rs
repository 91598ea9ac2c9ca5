//! # Sweeper de Expiración
//! src/jobs/sweeper.rs
//!
//! Thread de fondo que cada `interval` elimina del registry los jobs con más
//! de `max_age_secs` desde su submission, estén en el estado que estén.
//!
//! Un job eliminado mientras un worker lo traduce pierde su resultado: el
//! consumidor de resultados lo aplica sobre un ID inexistente y es un no-op.

use crate::jobs::registry::Registry;
use crate::metrics::MetricsCollector;
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Sweeper {
    registry: Arc<Registry>,
    metrics: MetricsCollector,
    interval: Duration,
    max_age_secs: u64,
}

impl Sweeper {
    pub fn new(
        registry: Arc<Registry>,
        metrics: MetricsCollector,
        interval: Duration,
        max_age_secs: u64,
    ) -> Self {
        Self {
            registry,
            metrics,
            interval,
            max_age_secs,
        }
    }

    /// Ejecuta una pasada y retorna cuántos jobs eliminó
    pub fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let expired = self.registry.expire(self.max_age_secs, now);
        for id in &expired {
            tracing::debug!(job_id = %id, "translation expired");
        }
        tracing::info!(
            evicted = expired.len(),
            remaining = self.registry.len(),
            "expiration sweep finished"
        );
        expired.len()
    }

    /// Lanza el loop del sweeper en su propio thread
    pub fn spawn(self, shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("sweeper".to_string())
            .spawn(move || {
                tracing::info!(
                    interval_secs = self.interval.as_secs(),
                    max_age_secs = self.max_age_secs,
                    "sweeper started"
                );
                while !shutdown.wait_timeout(self.interval) {
                    self.sweep_once(Utc::now());
                    match serde_json::to_string(&self.metrics.snapshot()) {
                        Ok(snapshot) => tracing::info!(%snapshot, "metrics"),
                        Err(e) => tracing::warn!(error = %e, "could not serialize metrics"),
                    }
                }
                tracing::info!("sweeper stopped");
            })
    }
}
