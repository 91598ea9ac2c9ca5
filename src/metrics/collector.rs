//! # Collector de Métricas
//! src/metrics/collector.rs
//!
//! Recolecta y agrega métricas del dispatcher en tiempo real.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Máximo de latencias a guardar para calcular percentiles
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Collector de métricas thread-safe
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsData>>,
    start_time: Instant,
}

/// Datos internos de métricas
#[derive(Default)]
struct MetricsData {
    /// Requests atendidos (con respuesta o sin ella)
    total_requests: u64,

    /// Requests por acción
    requests_per_action: BTreeMap<String, u64>,

    /// Faults por tipo
    faults: BTreeMap<&'static str, u64>,

    /// Frames rechazados por el codec
    frames_rejected: u64,

    /// Latencias registradas (en microsegundos), ventana deslizante
    latencies: VecDeque<u64>,

    /// Conexiones atendidas en este momento
    active_connections: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsData {
                latencies: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
                ..MetricsData::default()
            })),
            start_time: Instant::now(),
        }
    }

    /// Registra un request decodificado
    pub fn record_request(&self, action: &str, latency: Duration) {
        let mut data = self.inner.lock();
        data.total_requests += 1;
        *data.requests_per_action.entry(action.to_string()).or_insert(0) += 1;
        Self::push_latency(&mut data, latency);
    }

    /// Registra un request que terminó en fault
    pub fn record_fault(&self, kind: &'static str, latency: Duration) {
        let mut data = self.inner.lock();
        data.total_requests += 1;
        *data.faults.entry(kind).or_insert(0) += 1;
        Self::push_latency(&mut data, latency);
    }

    /// Registra un frame que no se pudo leer
    pub fn record_frame_rejected(&self) {
        self.inner.lock().frames_rejected += 1;
    }

    fn push_latency(data: &mut MetricsData, latency: Duration) {
        if data.latencies.len() >= MAX_LATENCY_SAMPLES {
            data.latencies.pop_front();
        }
        data.latencies
            .push_back(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn increment_active_connections(&self) {
        self.inner.lock().active_connections += 1;
    }

    pub fn decrement_active_connections(&self) {
        let mut data = self.inner.lock();
        data.active_connections = data.active_connections.saturating_sub(1);
    }

    pub fn active_connections(&self) -> u64 {
        self.inner.lock().active_connections
    }

    /// Calcula percentiles de latencia: (p50, p95, p99, avg)
    fn calculate_percentiles(latencies: &VecDeque<u64>) -> (u64, u64, u64, u64) {
        if latencies.is_empty() {
            return (0, 0, 0, 0);
        }

        let mut sorted: Vec<u64> = latencies.iter().copied().collect();
        sorted.sort_unstable();

        let len = sorted.len();
        let p50 = sorted[len * 50 / 100];
        let p95 = sorted[len * 95 / 100];
        let p99 = sorted[len * 99 / 100];

        let sum: u64 = sorted.iter().sum();
        let avg = sum / len as u64;

        (p50, p95, p99, avg)
    }

    /// Obtiene un snapshot de las métricas
    pub fn snapshot(&self) -> MetricsSnapshot {
        let data = self.inner.lock();
        let (p50, p95, p99, avg) = Self::calculate_percentiles(&data.latencies);

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            total_requests: data.total_requests,
            requests_per_action: data.requests_per_action.clone(),
            faults: data
                .faults
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            frames_rejected: data.frames_rejected,
            active_connections: data.active_connections,
            latency_p50_us: p50,
            latency_p95_us: p95,
            latency_p99_us: p99,
            latency_avg_us: avg,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot de métricas (para logging)
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub requests_per_action: BTreeMap<String, u64>,
    pub faults: BTreeMap<String, u64>,
    pub frames_rejected: u64,
    pub active_connections: u64,
    pub latency_p50_us: u64,
    pub latency_p95_us: u64,
    pub latency_p99_us: u64,
    pub latency_avg_us: u64,
}
