//! # Arranque del Dispatcher
//! src/app.rs
//!
//! Arma todas las piezas a partir de la configuración:
//!
//! ```text
//! LocalBroker ─┬─ Registry ── Router ── Server (listener)
//!              ├─ ResultConsumer × par
//!              └─ TranslationWorker × (par, workers)
//! Registry ── Sweeper
//! ```

use crate::config::Config;
use crate::error::{DispatchError, Result};
use crate::jobs::registry::Registry;
use crate::jobs::sweeper::Sweeper;
use crate::metrics::MetricsCollector;
use crate::queue::{Broker, LocalBroker};
use crate::router::Router;
use crate::server::Server;
use crate::shutdown::Shutdown;
use crate::worker::{spawn_pool, PoolSpec, ResultConsumer, Segmenter, TranslatorRegistry};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Dispatcher en ejecución
pub struct Dispatcher {
    local_addr: SocketAddr,
    registry: Arc<Registry>,
    broker: LocalBroker,
    metrics: MetricsCollector,
    shutdown: Shutdown,
    listener: JoinHandle<io::Result<()>>,
    background: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Valida la configuración y lanza listener, workers, consumidores y sweeper
    pub fn start(config: &Config, translators: &TranslatorRegistry) -> Result<Self> {
        config.validate()?;
        config.validate_backends(translators)?;

        let broker = match &config.broker_journal {
            Some(path) => LocalBroker::open(path)?,
            None => LocalBroker::in_memory(),
        };
        let shared_broker: Arc<dyn Broker> = Arc::new(broker.clone());

        let registry = Arc::new(Registry::new(
            &broker,
            config.pairs(),
            config.publish_attempts,
        )?);
        let metrics = MetricsCollector::new();
        let shutdown = Shutdown::new();

        let mut setup = shared_broker.channel()?;
        for pair in registry.pairs() {
            setup.declare(&pair.response_queue(), true)?;
        }
        drop(setup);

        let segmenter = Arc::new(Segmenter::new(
            &config.segmenter_command,
            &config.segmenter_host,
            config.segmenter_port,
        )?);

        let mut background = Vec::new();
        for route in &config.routes {
            background.push(
                ResultConsumer::new(route.pair.clone(), Arc::clone(&registry))
                    .spawn(Arc::clone(&shared_broker), shutdown.clone())?,
            );
            background.extend(spawn_pool(
                Arc::clone(&shared_broker),
                &PoolSpec::from(route),
                translators,
                Arc::clone(&segmenter),
                config.publish_attempts,
                &shutdown,
            )?);
        }

        background.push(
            Sweeper::new(
                Arc::clone(&registry),
                metrics.clone(),
                config.sweep_interval(),
                config.job_max_age_secs,
            )
            .spawn(shutdown.clone())?,
        );

        let router = Arc::new(Router::new(Arc::clone(&registry)));
        let server = Server::bind(config, router, metrics.clone(), shutdown.clone())?;
        let local_addr = server.local_addr()?;
        let listener = server.spawn()?;

        Ok(Self {
            local_addr,
            registry,
            broker,
            metrics,
            shutdown,
            listener,
            background,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broker(&self) -> &LocalBroker {
        &self.broker
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Bloquea hasta que el listener termine
    pub fn wait(self) -> Result<()> {
        let result = join_listener(self.listener);
        self.shutdown.trigger();
        for handle in self.background {
            let _ = handle.join();
        }
        result
    }

    /// Detiene todos los threads y espera a que terminen
    pub fn stop(self) -> Result<()> {
        self.shutdown.trigger();
        // Despierta al acceptor bloqueado en accept
        let _ = TcpStream::connect(self.local_addr);
        self.wait()
    }
}

fn join_listener(listener: JoinHandle<io::Result<()>>) -> Result<()> {
    match listener.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err(DispatchError::Internal("listener thread panicked".to_string())),
    }
}
