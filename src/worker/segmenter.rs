//! # Segmentador Externo
//! src/worker/segmenter.rs
//!
//! Ejecuta un comando de shell configurado antes de traducir. La plantilla
//! puede contener los placeholders `TEXT`, `HOST` y `PORT`:
//!
//! ```text
//! echo TEXT | nc HOST PORT
//! ```
//!
//! La sustitución es una sola pasada, así que el texto del usuario nunca
//! introduce placeholders nuevos. `TEXT` se inserta ya entre comillas
//! simples de shell; la plantilla no debe ponerle comillas propias.
//! Una plantilla vacía deja pasar el texto sin cambios.

use regex::{Captures, Regex};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmenterError {
    #[error("invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("could not run segmenter: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("segmenter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("segmenter output is not valid UTF-8")]
    InvalidOutput,
}

pub struct Segmenter {
    template: String,
    host: String,
    port: String,
    placeholders: Regex,
}

impl Segmenter {
    pub fn new(template: &str, host: &str, port: u16) -> Result<Self, SegmenterError> {
        Ok(Self {
            template: template.trim().to_string(),
            host: host.to_string(),
            port: port.to_string(),
            placeholders: Regex::new(r"TEXT|HOST|PORT")?,
        })
    }

    /// Segmentador sin comando (pass-through)
    pub fn passthrough() -> Result<Self, SegmenterError> {
        Self::new("", "", 0)
    }

    pub fn is_passthrough(&self) -> bool {
        self.template.is_empty()
    }

    /// Arma la línea de comando para `text`
    pub fn command_line(&self, text: &str) -> String {
        self.placeholders
            .replace_all(&self.template, |caps: &Captures| match &caps[0] {
                "TEXT" => shell_quote(text),
                "HOST" => self.host.clone(),
                _ => self.port.clone(),
            })
            .into_owned()
    }

    /// Segmenta `text`; la salida estándar recortada es el resultado
    pub fn segment(&self, text: &str) -> Result<String, SegmenterError> {
        if self.is_passthrough() {
            return Ok(text.to_string());
        }

        let command = self.command_line(text);
        tracing::debug!(%command, "running segmenter");

        let output = Command::new("sh").arg("-c").arg(&command).output()?;
        if !output.status.success() {
            return Err(SegmenterError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|_| SegmenterError::InvalidOutput)?;
        Ok(stdout.trim().to_string())
    }
}

/// Comillas simples de shell: `it's` → `'it'\''s'`
fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
