//! # Backends de Traducción
//! src/worker/translator.rs
//!
//! Un backend sólo expone `submit(text) -> translated_text`. El backend de
//! cada par se elige por nombre en la configuración a través de
//! `TranslatorRegistry`, una tabla `nombre → constructor`.
//!
//! ## Backends incluidos
//!
//! | Nombre    | Comportamiento                                        |
//! |-----------|-------------------------------------------------------|
//! | `echo`    | Retorna el texto de entrada                           |
//! | `opennmt` | `POST /translator/translate` contra un servidor REST  |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Timeout por request para backends HTTP
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("unknown translation backend: {0}")]
    UnknownBackend(String),

    #[error("backend {backend} requires an endpoint (HOST:PORT)")]
    MissingEndpoint { backend: String },

    #[error("translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected backend response: {0}")]
    UnexpectedResponse(String),
}

/// Dirección de un servidor de traducción
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Capacidad de traducir un texto
pub trait Translator: Send + Sync {
    fn submit(&self, text: &str) -> Result<String, TranslateError>;
}

/// Constructor de un backend a partir de su endpoint (si tiene)
pub type TranslatorFactory =
    fn(Option<&BackendEndpoint>) -> Result<Box<dyn Translator>, TranslateError>;

/// Tabla de backends disponibles
pub struct TranslatorRegistry {
    factories: BTreeMap<String, TranslatorFactory>,
}

impl TranslatorRegistry {
    /// Registry vacío
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry con los backends incluidos (`echo`, `opennmt`)
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("echo", |_| Ok(Box::new(EchoTranslator)));
        registry.register("opennmt", |endpoint| {
            let endpoint = endpoint.ok_or_else(|| TranslateError::MissingEndpoint {
                backend: "opennmt".to_string(),
            })?;
            Ok(Box::new(OpenNmtTranslator::new(
                endpoint,
                DEFAULT_BACKEND_TIMEOUT,
            )?))
        });
        registry
    }

    /// Registra (o reemplaza) un backend
    pub fn register(&mut self, name: &str, factory: TranslatorFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construye una instancia del backend `name`
    pub fn create(
        &self,
        name: &str,
        endpoint: Option<&BackendEndpoint>,
    ) -> Result<Box<dyn Translator>, TranslateError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TranslateError::UnknownBackend(name.to_string()))?;
        factory(endpoint)
    }
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Backend identidad
pub struct EchoTranslator;

impl Translator for EchoTranslator {
    fn submit(&self, text: &str) -> Result<String, TranslateError> {
        Ok(text.to_string())
    }
}

#[derive(Serialize)]
struct OpenNmtRequest<'a> {
    src: &'a str,
    id: u32,
}

#[derive(Deserialize)]
struct OpenNmtResult {
    tgt: String,
}

/// Cliente del servidor REST de OpenNMT
pub struct OpenNmtTranslator {
    client: reqwest::blocking::Client,
    url: String,
}

impl OpenNmtTranslator {
    pub fn new(endpoint: &BackendEndpoint, timeout: Duration) -> Result<Self, TranslateError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!("http://{}/translator/translate", endpoint),
        })
    }
}

impl Translator for OpenNmtTranslator {
    fn submit(&self, text: &str) -> Result<String, TranslateError> {
        let body = [OpenNmtRequest { src: text, id: 1 }];
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()?
            .error_for_status()?;

        let results: Vec<Vec<OpenNmtResult>> = response.json()?;
        extract_single_target(results)
    }
}

/// La respuesta debe ser exactamente `[[{"tgt": ...}]]`
fn extract_single_target(results: Vec<Vec<OpenNmtResult>>) -> Result<String, TranslateError> {
    let [batch]: [Vec<OpenNmtResult>; 1] = results
        .try_into()
        .map_err(|r: Vec<_>| TranslateError::UnexpectedResponse(format!("{} batches", r.len())))?;
    let [result]: [OpenNmtResult; 1] = batch
        .try_into()
        .map_err(|r: Vec<_>| TranslateError::UnexpectedResponse(format!("{} results", r.len())))?;
    Ok(result.tgt)
}
