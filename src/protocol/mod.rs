//! # Protocolo de Transporte
//! src/protocol/mod.rs
//!
//! Protocolo request/response sobre TCP con framing textual:
//!
//! ```text
//! {"action": "get_server_version"}==== EOM ====
//! ```
//!
//! - `frame`: lectura/escritura de mensajes terminados por delimitador
//! - `client`: cliente de referencia (conectar → enviar → leer → cerrar)

pub mod client;
pub mod frame;

pub use client::{Client, ClientError};
pub use frame::{encode_frame, write_frame, FrameError, FrameReader, DELIMITER};
