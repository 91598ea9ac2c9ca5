//! # Router de Acciones
//! src/router/mod.rs
//!
//! Decodifica el payload de un frame en una `Action`, la ejecuta contra el
//! registry y produce la respuesta.
//!
//! ## Arquitectura
//!
//! ```text
//! Frame → Action::parse → Router::dispatch → Registry → Reply
//!                 └──────────── ProtocolFault ─────────────┘
//! ```
//!
//! Un `ProtocolFault` no es fatal: la capa de transporte decide con
//! `fallback_reply()` si responde `{}` o no responde nada.

use crate::jobs::registry::{Listing, Registry, RegistryError};
use crate::jobs::types::{parse_submission_date, NewJob};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Versión reportada por `get_server_version`
pub const SERVER_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolFault {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("translation not visible to caller")]
    Unauthorized,

    #[error("unsupported language pair: {0}")]
    UnsupportedPair(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ProtocolFault {
    /// Respuesta que recibe el cliente, o `None` si no se responde
    pub fn fallback_reply(&self) -> Option<Value> {
        match self {
            ProtocolFault::Unauthorized
            | ProtocolFault::UnsupportedPair(_)
            | ProtocolFault::Unavailable(_) => Some(Value::Object(Map::new())),
            ProtocolFault::Malformed(_)
            | ProtocolFault::UnknownAction(_)
            | ProtocolFault::MissingField(_) => None,
        }
    }

    /// Etiqueta estable para métricas y logs
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolFault::Malformed(_) => "malformed",
            ProtocolFault::UnknownAction(_) => "unknown_action",
            ProtocolFault::MissingField(_) => "missing_field",
            ProtocolFault::Unauthorized => "unauthorized",
            ProtocolFault::UnsupportedPair(_) => "unsupported_pair",
            ProtocolFault::Unavailable(_) => "unavailable",
        }
    }
}

impl From<RegistryError> for ProtocolFault {
    fn from(err: RegistryError) -> Self {
        match err {
            // No encontrado y prohibido son indistinguibles para el cliente
            RegistryError::NotFound | RegistryError::Forbidden => ProtocolFault::Unauthorized,
            RegistryError::UnsupportedPair(pair) => ProtocolFault::UnsupportedPair(pair),
            RegistryError::Enqueue(e) => ProtocolFault::Unavailable(e.to_string()),
        }
    }
}

/// Request decodificado
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    GetServerVersion,
    GetServerStatus,
    GetTranslations {
        user_id: String,
    },
    AddTranslation {
        user_id: String,
        lang_source: String,
        lang_target: String,
        text_source: String,
        date_submission: Option<String>,
    },
    GetTranslation {
        user_id: String,
        translation_id: String,
    },
    RemoveTranslation {
        user_id: String,
        translation_id: String,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::GetServerVersion => "get_server_version",
            Action::GetServerStatus => "get_server_status",
            Action::GetTranslations { .. } => "get_translations",
            Action::AddTranslation { .. } => "add_translation",
            Action::GetTranslation { .. } => "get_translation",
            Action::RemoveTranslation { .. } => "remove_translation",
        }
    }

    /// Decodifica un payload JSON
    ///
    /// El campo `action` selecciona la acción. Por compatibilidad, las dos
    /// acciones de salud también se aceptan en el campo `type`.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolFault> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| ProtocolFault::Malformed(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(ProtocolFault::Malformed("request is not a JSON object".to_string()));
        };

        let name = match (fields.get("action"), fields.get("type")) {
            (Some(Value::String(action)), _) => action.as_str(),
            (None, Some(Value::String(legacy)))
                if legacy == "get_server_version" || legacy == "get_server_status" =>
            {
                legacy.as_str()
            }
            (None, Some(Value::String(legacy))) => {
                return Err(ProtocolFault::UnknownAction(legacy.clone()))
            }
            (Some(_), _) => return Err(ProtocolFault::Malformed("action is not a string".to_string())),
            (None, _) => return Err(ProtocolFault::MissingField("action")),
        };

        let action = match name {
            "get_server_version" => Action::GetServerVersion,
            "get_server_status" => Action::GetServerStatus,
            "get_translations" => Action::GetTranslations {
                user_id: required(&fields, "user_id")?,
            },
            "add_translation" => Action::AddTranslation {
                user_id: required(&fields, "user_id")?,
                lang_source: required(&fields, "lang_source")?,
                lang_target: required(&fields, "lang_target")?,
                text_source: required(&fields, "text_source")?,
                date_submission: fields
                    .get("date_submission")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "get_translation" => Action::GetTranslation {
                user_id: required(&fields, "user_id")?,
                translation_id: required(&fields, "translation_id")?,
            },
            "remove_translation" => Action::RemoveTranslation {
                user_id: required(&fields, "user_id")?,
                translation_id: required(&fields, "translation_id")?,
            },
            other => return Err(ProtocolFault::UnknownAction(other.to_string())),
        };
        Ok(action)
    }
}

fn required(fields: &Map<String, Value>, name: &'static str) -> Result<String, ProtocolFault> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ProtocolFault::MissingField(name))
}

/// Respuesta de una acción exitosa
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub action: &'static str,
    pub body: Value,
}

/// Router que ejecuta acciones contra el registry
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Decodifica y ejecuta un payload
    pub fn handle(&self, payload: &[u8]) -> Result<Reply, ProtocolFault> {
        let action = Action::parse(payload)?;
        let name = action.name();
        let body = self.dispatch(action)?;
        Ok(Reply { action: name, body })
    }

    /// Ejecuta una acción ya decodificada
    pub fn dispatch(&self, action: Action) -> Result<Value, ProtocolFault> {
        match action {
            Action::GetServerVersion => Ok(json!({ "server_version": SERVER_VERSION })),
            Action::GetServerStatus => Ok(json!({ "server_status": "OK" })),

            Action::GetTranslations { user_id } => {
                tracing::debug!(%user_id, "get_translations");
                Ok(listing_to_json(self.registry.get_translations(&user_id)))
            }

            Action::AddTranslation {
                user_id,
                lang_source,
                lang_target,
                text_source,
                date_submission,
            } => {
                tracing::debug!(%user_id, %lang_source, %lang_target, "add_translation");
                let now = Utc::now();
                let job = self.registry.add_translation(NewJob {
                    owner: user_id,
                    lang_source,
                    lang_target,
                    text_source,
                    date_submission: parse_submission_date(date_submission.as_deref(), now),
                })?;
                to_json(&job)
            }

            Action::GetTranslation {
                user_id,
                translation_id,
            } => {
                tracing::debug!(%user_id, %translation_id, "get_translation");
                let job = self.registry.get_translation(&user_id, &translation_id)?;
                to_json(&job)
            }

            Action::RemoveTranslation {
                user_id,
                translation_id,
            } => {
                tracing::debug!(%user_id, %translation_id, "remove_translation");
                let job = self.registry.remove_translation(&user_id, &translation_id)?;
                tracing::info!(job_id = %job.id, %user_id, "translation removed");
                to_json(&job)
            }
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, ProtocolFault> {
    serde_json::to_value(value).map_err(|e| ProtocolFault::Unavailable(e.to_string()))
}

/// `{id: job}` para un usuario, `{id: {status, owner}}` para admin
fn listing_to_json(listing: Listing) -> Value {
    let mut map = Map::new();
    match listing {
        Listing::Owned(jobs) => {
            for job in jobs {
                if let Ok(value) = serde_json::to_value(&job) {
                    map.insert(job.id, value);
                }
            }
        }
        Listing::All(summaries) => {
            for summary in summaries {
                if let Ok(value) = serde_json::to_value(&summary) {
                    map.insert(summary.id, value);
                }
            }
        }
    }
    Value::Object(map)
}
