//! # Cliente HTTP Administrativo
//! src/admin.rs
//!
//! Cliente REST para herramientas externas que administran traducciones a
//! través de la API web (no lo usa el dispatcher):
//!
//! | Método | Ruta                 |
//! |--------|----------------------|
//! | GET    | `{prefix}/translations`     |
//! | GET    | `{prefix}/translation/{id}` |
//! | POST   | `{prefix}/translation`      |
//! | DELETE | `{prefix}/translation/{id}` |
//!
//! Cada llamada hace hasta `MAX_ATTEMPTS` intentos sin backoff. Un cuerpo
//! JSON no vacío termina los reintentos; si ninguno lo obtiene, el
//! resultado es un objeto vacío.

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::ACCEPT;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;

pub const MAX_ATTEMPTS: usize = 3;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
}

pub struct AdminClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl AdminClient {
    /// `base_url` incluye el prefijo del servicio, p. ej.
    /// `https://example.org/api/1.0`
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, AdminError> {
        Self::with_timeout(base_url, username, password, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, AdminError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn get_translations(&self) -> Value {
        self.call("get_translations", || {
            self.client.get(format!("{}/translations", self.base_url))
        })
    }

    pub fn get_translation(&self, id: &str) -> Value {
        self.call("get_translation", || {
            self.client
                .get(format!("{}/translation/{}", self.base_url, id))
        })
    }

    pub fn post_translation(&self, lang_source: &str, lang_target: &str, text: &str) -> Value {
        let body = json!({
            "lang_source": lang_source,
            "lang_target": lang_target,
            "text_source": text,
        });
        self.call("post_translation", || {
            self.client
                .post(format!("{}/translation", self.base_url))
                .json(&body)
        })
    }

    pub fn delete_translation(&self, id: &str) -> Value {
        self.call("delete_translation", || {
            self.client
                .delete(format!("{}/translation/{}", self.base_url, id))
        })
    }

    fn call<F>(&self, operation: &str, build: F) -> Value
    where
        F: Fn() -> RequestBuilder,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let request = build()
                .basic_auth(&self.username, Some(&self.password))
                .header(ACCEPT, "application/json");

            match request.send().and_then(|response| response.bytes()) {
                Ok(body) if body.is_empty() => {
                    tracing::debug!(operation, attempt, "empty response, retrying");
                }
                Ok(body) => match serde_json::from_slice(&body) {
                    Ok(value) => return value,
                    Err(e) => tracing::debug!(operation, attempt, error = %e, "invalid json, retrying"),
                },
                Err(e) => {
                    tracing::debug!(operation, attempt, error = %e, "request failed, retrying");
                }
            }
        }

        tracing::warn!(operation, attempts = MAX_ATTEMPTS, "no data after all attempts");
        Value::Object(Map::new())
    }
}
