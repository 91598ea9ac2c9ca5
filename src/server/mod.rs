//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Servidor TCP que:
//! 1. Escucha en un puerto
//! 2. Acepta conexiones (hasta `max_connections` a la vez)
//! 3. Lee un frame por conexión y lo pasa al router
//! 4. Escribe la respuesta enmarcada, `{}` o nada según el resultado

pub mod limiter;
pub mod tcp;

pub use limiter::{ConnectionLimiter, ConnectionPermit};
pub use tcp::Server;
