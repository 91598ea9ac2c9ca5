//! # Tipos y Estructuras para el Sistema de Jobs
//! src/jobs/types.rs
//!
//! Define los tipos fundamentales de un trabajo de traducción.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Identidad administrativa: ve y borra todos los jobs
pub const ADMIN_USER: &str = "admin";

/// Estado de un job
///
/// El orden de las variantes es el orden del ciclo de vida; un job sólo
/// avanza, nunca retrocede.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Registrado y encolado, ningún worker lo tomó todavía
    Pending,

    /// Un worker lo está traduciendo
    Processing,

    /// Traducción disponible en `text_target`
    Processed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Processed => "PROCESSED",
        }
    }

    /// Verifica si la transición a `next` respeta el orden del ciclo de vida
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        next > *self
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid language pair: {0:?}")]
pub struct InvalidLanguagePair(pub String);

/// Par de idiomas `source-target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanguagePair {
    source: String,
    target: String,
}

impl LanguagePair {
    pub fn new(source: &str, target: &str) -> Result<Self, InvalidLanguagePair> {
        let valid = |code: &str| {
            !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        };
        if !valid(source) || !valid(target) {
            return Err(InvalidLanguagePair(format!("{}-{}", source, target)));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Cola de requests hacia los workers
    pub fn request_queue(&self) -> String {
        format!("trans_req_{}", self)
    }

    /// Cola de resultados hacia el dispatcher
    pub fn response_queue(&self) -> String {
        format!("trans_resp_{}", self)
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = InvalidLanguagePair;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((source, target)) => LanguagePair::new(source, target),
            None => Err(InvalidLanguagePair(s.to_string())),
        }
    }
}

/// ID opaco de un job
pub type JobId = String;

/// Datos de un nuevo job tal como llegan en `add_translation`
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner: String,
    pub lang_source: String,
    pub lang_target: String,
    pub text_source: String,
    pub date_submission: DateTime<Utc>,
}

/// Un trabajo de traducción y su estado
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// ID único asignado por el registry
    pub id: JobId,

    /// Usuario que lo envió
    pub owner: String,

    pub lang_source: String,
    pub lang_target: String,

    /// Texto original (inmutable)
    pub text_source: String,

    /// Traducción, ausente hasta que el job se procesa
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_target: Option<String>,

    pub status: JobStatus,

    /// Momento de envío; base para la expiración
    pub date_submission: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_processed: Option<DateTime<Utc>>,
}

impl Job {
    /// Crea un job PENDING con un ID nuevo
    pub fn new(new_job: NewJob) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner: new_job.owner,
            lang_source: new_job.lang_source,
            lang_target: new_job.lang_target,
            text_source: new_job.text_source,
            text_target: None,
            status: JobStatus::Pending,
            date_submission: new_job.date_submission,
            date_processed: None,
        }
    }

    /// Par de idiomas del job
    pub fn language_pair(&self) -> Result<LanguagePair, InvalidLanguagePair> {
        LanguagePair::new(&self.lang_source, &self.lang_target)
    }

    /// Verifica si `user_id` puede ver este job
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        user_id == ADMIN_USER || self.owner == user_id
    }

    /// Marca el job como en proceso (no-op si ya avanzó más)
    pub fn mark_processing(&mut self) -> bool {
        self.advance(JobStatus::Processing)
    }

    /// Guarda la traducción y marca el job como procesado
    pub fn mark_processed(&mut self, text: String, now: DateTime<Utc>) -> bool {
        if !self.advance(JobStatus::Processed) {
            return false;
        }
        self.text_target = Some(text);
        self.date_processed = Some(now);
        true
    }

    /// Edad en segundos completos desde la submission
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.date_submission).num_seconds()
    }

    fn advance(&mut self, next: JobStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// Interpreta `date_submission` del request
///
/// Acepta RFC 3339 o `YYYY-MM-DD HH:MM:SS` (UTC). Cualquier otra cosa usa
/// la hora actual del servidor.
pub fn parse_submission_date(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw else {
        return now;
    };
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return date.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or(now)
}
