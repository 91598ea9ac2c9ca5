//! # Errores del Dispatcher
//! src/error.rs
//!
//! Cada subsistema define su propio enum de error; `DispatchError` los
//! agrupa para el código que cruza varias capas (arranque, workers,
//! consumidores de resultados).

use crate::config::ConfigError;
use crate::jobs::registry::RegistryError;
use crate::protocol::FrameError;
use crate::queue::BrokerError;
use crate::worker::segmenter::SegmenterError;
use crate::worker::translator::TranslateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Segmenter(#[from] SegmenterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
