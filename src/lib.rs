//! # MT Dispatch
//! src/lib.rs
//!
//! Dispatcher de trabajos de traducción: recibe requests JSON sobre un
//! protocolo TCP enmarcado, registra cada job, lo encola en la cola durable
//! de su par de idiomas y lo entrega a un pool de workers que segmentan y
//! traducen. Los resultados vuelven por otra cola y actualizan el registry.
//!
//! ## Arquitectura
//!
//! - `protocol`: framing con delimitador y cliente de referencia
//! - `router`: decodificación de acciones y respuestas
//! - `jobs`: registry de jobs y sweeper de expiración
//! - `queue`: abstracción del broker y broker local con journal
//! - `worker`: workers de traducción, backends, segmentador y consumidor de resultados
//! - `server`: listener TCP con límite de conexiones
//! - `metrics`: recolección de métricas en memoria
//! - `admin`: cliente HTTP de la API administrativa
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use mt_dispatch::app::Dispatcher;
//! use mt_dispatch::config::Config;
//! use mt_dispatch::worker::TranslatorRegistry;
//!
//! let config = Config::default();
//! let dispatcher = Dispatcher::start(&config, &TranslatorRegistry::with_builtins())?;
//! dispatcher.wait()?;
//! # Ok::<(), mt_dispatch::error::DispatchError>(())
//! ```

pub mod admin;
pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod worker;

pub use error::{DispatchError, Result};
