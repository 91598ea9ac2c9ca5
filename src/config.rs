//! # Configuración del Dispatcher
//! src/config.rs
//!
//! Configuración de línea de comandos con soporte para variables de entorno.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./mt-dispatch serve --port 46000 \
//!   --route ja-en=opennmt@127.0.0.1:46101*2 \
//!   --route en-ja=echo \
//!   --job-max-age-secs 600
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! DISPATCH_PORT=46000 ROUTES=ja-en=echo,en-ja=echo ./mt-dispatch serve
//! ```
//!
//! ## Formato de ruta
//!
//! `PAIR=BACKEND[@HOST:PORT][*WORKERS]`: par de idiomas, nombre del backend
//! de traducción, endpoint opcional y cantidad de workers (1 por defecto).

use crate::jobs::registry::DEFAULT_PUBLISH_ATTEMPTS;
use crate::jobs::types::LanguagePair;
use crate::protocol::frame::DEFAULT_MAX_FRAME_BYTES;
use crate::worker::{BackendEndpoint, PoolSpec, TranslatorRegistry};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid route {route:?}: {reason}")]
    InvalidRoute { route: String, reason: String },

    #[error("language pair {0} is routed more than once")]
    DuplicateRoute(String),

    #[error("no route configured")]
    NoRoutes,

    #[error("unknown translation backend {backend:?} for {pair}")]
    UnknownBackend { pair: String, backend: String },

    #[error("{0}")]
    OutOfRange(&'static str),
}

/// Ruta de un par de idiomas hacia su backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub pair: LanguagePair,
    pub backend: String,
    pub endpoint: Option<BackendEndpoint>,
    pub workers: usize,
}

impl FromStr for RouteSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidRoute {
            route: s.to_string(),
            reason: reason.to_string(),
        };

        let (pair, rest) = s.trim().split_once('=').ok_or_else(|| invalid("missing '='"))?;
        let pair = pair
            .parse::<LanguagePair>()
            .map_err(|e| invalid(&e.to_string()))?;

        let (rest, workers) = match rest.rsplit_once('*') {
            Some((rest, workers)) => {
                let workers: usize = workers
                    .parse()
                    .map_err(|_| invalid("worker count is not a number"))?;
                (rest, workers)
            }
            None => (rest, 1),
        };
        if workers == 0 {
            return Err(invalid("worker count must be >= 1"));
        }

        let (backend, endpoint) = match rest.split_once('@') {
            Some((backend, address)) => {
                let (host, port) = address
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("endpoint must be HOST:PORT"))?;
                let port: u16 = port.parse().map_err(|_| invalid("invalid endpoint port"))?;
                if host.is_empty() {
                    return Err(invalid("empty endpoint host"));
                }
                (
                    backend,
                    Some(BackendEndpoint {
                        host: host.to_string(),
                        port,
                    }),
                )
            }
            None => (rest, None),
        };
        if backend.is_empty() {
            return Err(invalid("empty backend name"));
        }

        Ok(Self {
            pair,
            backend: backend.to_string(),
            endpoint,
            workers,
        })
    }
}

impl From<&RouteSpec> for PoolSpec {
    fn from(route: &RouteSpec) -> Self {
        PoolSpec {
            pair: route.pair.clone(),
            backend: route.backend.clone(),
            endpoint: route.endpoint.clone(),
            workers: route.workers,
        }
    }
}

/// Línea de comandos del binario
#[derive(Debug, Parser)]
#[command(name = "mt-dispatch")]
#[command(about = "Dispatcher de trabajos de traducción sobre TCP")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia el dispatcher con sus workers
    Serve(Config),

    /// Envía un request JSON y muestra la respuesta
    Request(RequestArgs),
}

/// Opciones del cliente de referencia
#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    #[arg(long, default_value = "127.0.0.1", env = "DISPATCH_HOST")]
    pub host: String,

    #[arg(short, long, default_value = "46000", env = "DISPATCH_PORT")]
    pub port: u16,

    /// Request JSON; si falta se lee de stdin
    #[arg(long)]
    pub json: Option<String>,

    /// Tiempo máximo de espera por la respuesta
    #[arg(long = "timeout-ms", default_value = "10000")]
    pub timeout_ms: u64,
}

impl RequestArgs {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuración del dispatcher
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Host/IP en el que escucha
    #[arg(long, default_value = "127.0.0.1", env = "DISPATCH_HOST")]
    pub host: String,

    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "46000", env = "DISPATCH_PORT")]
    pub port: u16,

    // === Conexiones ===

    /// Máximo de conexiones atendidas a la vez
    #[arg(long = "max-connections", default_value = "256", env = "MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Timeout de lectura por conexión en milisegundos (0 = sin timeout)
    #[arg(long = "read-timeout-ms", default_value = "30000", env = "READ_TIMEOUT_MS")]
    pub read_timeout_ms: u64,

    /// Tamaño máximo de un frame en bytes
    #[arg(long = "max-frame-bytes", default_value_t = DEFAULT_MAX_FRAME_BYTES, env = "MAX_FRAME_BYTES")]
    pub max_frame_bytes: usize,

    // === Rutas y workers ===

    /// Ruta PAIR=BACKEND[@HOST:PORT][*WORKERS] (repetible)
    #[arg(long = "route", env = "ROUTES", value_delimiter = ',', default_value = "ja-en=echo")]
    pub routes: Vec<RouteSpec>,

    /// Comando de segmentación con placeholders TEXT, HOST y PORT (vacío = sin segmentar)
    #[arg(long = "segmenter-command", default_value = "", env = "SEGMENTER_COMMAND")]
    pub segmenter_command: String,

    #[arg(long = "segmenter-host", default_value = "127.0.0.1", env = "SEGMENTER_HOST")]
    pub segmenter_host: String,

    #[arg(long = "segmenter-port", default_value = "46200", env = "SEGMENTER_PORT")]
    pub segmenter_port: u16,

    // === Expiración ===

    /// Intervalo entre pasadas del sweeper en segundos
    #[arg(long = "sweep-interval-secs", default_value = "300", env = "SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: u64,

    /// Edad máxima de un job en segundos
    #[arg(long = "job-max-age-secs", default_value = "600", env = "JOB_MAX_AGE_SECS")]
    pub job_max_age_secs: u64,

    // === Broker ===

    /// Journal del broker (sin valor = sólo memoria)
    #[arg(long = "broker-journal", env = "BROKER_JOURNAL")]
    pub broker_journal: Option<PathBuf>,

    /// Intentos por publish antes de rendirse
    #[arg(long = "publish-attempts", default_value_t = DEFAULT_PUBLISH_ATTEMPTS, env = "PUBLISH_ATTEMPTS")]
    pub publish_attempts: usize,
}

impl Config {
    /// Dirección completa para bind (host:port)
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Pares de idiomas soportados
    pub fn pairs(&self) -> Vec<LanguagePair> {
        self.routes.iter().map(|route| route.pair.clone()).collect()
    }

    /// Valida rangos y rutas
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::OutOfRange("max connections must be >= 1"));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::OutOfRange("max frame bytes must be >= 1"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::OutOfRange("sweep interval must be > 0"));
        }
        if self.job_max_age_secs == 0 {
            return Err(ConfigError::OutOfRange("job max age must be > 0"));
        }
        if self.publish_attempts == 0 {
            return Err(ConfigError::OutOfRange("publish attempts must be >= 1"));
        }

        if self.routes.is_empty() {
            return Err(ConfigError::NoRoutes);
        }
        let mut seen = BTreeSet::new();
        for route in &self.routes {
            if !seen.insert(&route.pair) {
                return Err(ConfigError::DuplicateRoute(route.pair.to_string()));
            }
        }

        Ok(())
    }

    /// Verifica que cada ruta use un backend registrado
    pub fn validate_backends(&self, translators: &TranslatorRegistry) -> Result<(), ConfigError> {
        match self.routes.iter().find(|route| !translators.contains(&route.backend)) {
            Some(route) => Err(ConfigError::UnknownBackend {
                pair: route.pair.to_string(),
                backend: route.backend.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Registra la configuración efectiva
    pub fn log_summary(&self) {
        tracing::info!(
            address = %self.address(),
            max_connections = self.max_connections,
            read_timeout_ms = self.read_timeout_ms,
            max_frame_bytes = self.max_frame_bytes,
            "network"
        );
        for route in &self.routes {
            tracing::info!(
                pair = %route.pair,
                backend = %route.backend,
                endpoint = %route
                    .endpoint
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "-".to_string()),
                workers = route.workers,
                "route"
            );
        }
        if self.segmenter_command.is_empty() {
            tracing::info!("segmenter: pass-through");
        } else {
            tracing::info!(
                command = %self.segmenter_command,
                host = %self.segmenter_host,
                port = self.segmenter_port,
                "segmenter"
            );
        }
        tracing::info!(
            sweep_interval_secs = self.sweep_interval_secs,
            job_max_age_secs = self.job_max_age_secs,
            "expiration"
        );
        tracing::info!(
            journal = %self
                .broker_journal
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "memory only".to_string()),
            publish_attempts = self.publish_attempts,
            "broker"
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 46000,
            max_connections: 256,
            read_timeout_ms: 30_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            routes: "ja-en=echo".parse::<RouteSpec>().into_iter().collect(),
            segmenter_command: String::new(),
            segmenter_host: "127.0.0.1".to_string(),
            segmenter_port: 46200,
            sweep_interval_secs: 300,
            job_max_age_secs: 600,
            broker_journal: None,
            publish_attempts: DEFAULT_PUBLISH_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 46000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.job_max_age_secs, 600);
        assert_eq!(config.pairs(), vec!["ja-en".parse::<LanguagePair>().unwrap()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_address() {
        let mut config = Config::default();
        config.host = "0.0.0.0".to_string();
        config.port = 3000;
        assert_eq!(config.address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_read_timeout_zero_disables() {
        let mut config = Config::default();
        assert_eq!(config.read_timeout(), Some(Duration::from_secs(30)));
        config.read_timeout_ms = 0;
        assert_eq!(config.read_timeout(), None);
    }

    // ==================== Routes ====================

    #[test]
    fn test_route_minimal() {
        let route: RouteSpec = "ja-en=echo".parse().unwrap();
        assert_eq!(route.pair.to_string(), "ja-en");
        assert_eq!(route.backend, "echo");
        assert_eq!(route.endpoint, None);
        assert_eq!(route.workers, 1);
    }

    #[test]
    fn test_route_full() {
        let route: RouteSpec = "ja-en=opennmt@moss106:46101*3".parse().unwrap();
        assert_eq!(route.backend, "opennmt");
        assert_eq!(
            route.endpoint,
            Some(BackendEndpoint {
                host: "moss106".to_string(),
                port: 46101
            })
        );
        assert_eq!(route.workers, 3);

        let pool = PoolSpec::from(&route);
        assert_eq!(pool.workers, 3);
        assert_eq!(pool.pair, route.pair);
    }

    #[test]
    fn test_route_invalid() {
        for raw in [
            "ja-en",
            "jaen=echo",
            "ja-en=",
            "ja-en=echo*0",
            "ja-en=echo*x",
            "ja-en=opennmt@host",
            "ja-en=opennmt@:80",
            "ja-en=opennmt@host:99999",
        ] {
            assert!(
                matches!(raw.parse::<RouteSpec>(), Err(ConfigError::InvalidRoute { .. })),
                "{} should be rejected",
                raw
            );
        }
    }

    // ==================== Validation ====================

    #[test]
    fn test_validate_duplicate_route() {
        let mut config = Config::default();
        config.routes.push("ja-en=opennmt@h:1".parse().unwrap());
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateRoute("ja-en".to_string()))
        );
    }

    #[test]
    fn test_validate_no_routes() {
        let mut config = Config::default();
        config.routes.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoRoutes));
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = Config::default();
        config.max_connections = 0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(msg)) if msg.contains("max connections")));

        let mut config = Config::default();
        config.sweep_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(msg)) if msg.contains("sweep interval")));

        let mut config = Config::default();
        config.job_max_age_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange(msg)) if msg.contains("max age")));

        let mut config = Config::default();
        config.publish_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_backends() {
        let translators = TranslatorRegistry::with_builtins();
        let mut config = Config::default();
        assert!(config.validate_backends(&translators).is_ok());

        config.routes = vec!["ja-en=knmt@h:1".parse().unwrap()];
        assert_eq!(
            config.validate_backends(&translators),
            Err(ConfigError::UnknownBackend {
                pair: "ja-en".to_string(),
                backend: "knmt".to_string()
            })
        );
    }

    // ==================== CLI ====================

    #[test]
    fn test_cli_serve() {
        let cli = Cli::try_parse_from([
            "mt-dispatch",
            "serve",
            "--port",
            "0",
            "--route",
            "ja-en=echo*2",
            "--route",
            "en-ja=opennmt@127.0.0.1:46101",
            "--job-max-age-secs",
            "60",
        ])
        .unwrap();

        let Command::Serve(config) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(config.port, 0);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].workers, 2);
        assert_eq!(config.job_max_age_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cli_rejects_bad_route() {
        assert!(Cli::try_parse_from(["mt-dispatch", "serve", "--route", "nonsense"]).is_err());
    }

    #[test]
    fn test_cli_request() {
        let cli = Cli::try_parse_from([
            "mt-dispatch",
            "request",
            "--port",
            "46001",
            "--json",
            r#"{"action":"get_server_status"}"#,
        ])
        .unwrap();

        let Command::Request(args) = cli.command else {
            panic!("expected request");
        };
        assert_eq!(args.port, 46001);
        assert_eq!(args.json.as_deref(), Some(r#"{"action":"get_server_status"}"#));
    }

    #[test]
    fn test_log_summary() {
        // No debe hacer panic
        Config::default().log_summary();
    }
}
