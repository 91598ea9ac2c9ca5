//! # Colas de Trabajo
//! src/queue/mod.rs
//!
//! Abstracción de un broker con colas durables y entrega at-least-once:
//!
//! ```text
//! Registry ──publish──▶ trans_req_{pair} ──get──▶ Worker
//!                                                   │
//! Dispatcher ◀──get── trans_resp_{pair} ◀──publish──┘
//! ```
//!
//! Cada worker/consumidor abre su propio `Channel`; un mensaje sólo sale de
//! la cola cuando se hace `ack`. Si el canal se cierra antes, el mensaje
//! vuelve a la cola y otro consumidor lo recibe.

pub mod local;

pub use local::LocalBroker;

use crate::jobs::types::{Job, JobId};
use crate::shutdown::Shutdown;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Cada cuánto los loops de consumo revisan la señal de apagado
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue not declared: {0}")]
    UnknownQueue(String),

    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(u64),

    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("journal i/o failed: {0}")]
    Journal(#[from] std::io::Error),
}

/// Identificador de una entrega dentro de un canal
pub type DeliveryTag = u64;

/// Mensaje recibido, pendiente de `ack`
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub body: Vec<u8>,
    /// `true` si el mensaje ya había sido entregado antes
    pub redelivered: bool,
}

/// Sesión de un consumidor/productor con el broker
///
/// No se comparte entre threads: cada worker abre la suya.
pub trait Channel: Send {
    /// Declara una cola (idempotente)
    fn declare(&mut self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    /// Publica un mensaje; `persistent` lo hace sobrevivir a un reinicio
    fn publish(&mut self, queue: &str, body: &[u8], persistent: bool) -> Result<(), BrokerError>;

    /// Máximo de entregas sin `ack` que puede tener este canal
    fn qos(&mut self, prefetch: usize);

    /// Espera hasta `timeout` por el siguiente mensaje de la cola
    fn get(&mut self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Confirma una entrega; el mensaje se elimina definitivamente
    fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError>;
}

/// Fábrica de canales independientes
pub trait Broker: Send + Sync {
    fn channel(&self) -> Result<Box<dyn Channel>, BrokerError>;
}

/// Sobre de los mensajes que viajan por las colas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueMessage {
    /// Job a traducir (cola de requests)
    Request { job: Job },

    /// Un worker tomó el job (cola de resultados)
    Processing { id: JobId },

    /// Traducción terminada (cola de resultados)
    Result { id: JobId, translated_text: String },
}

impl QueueMessage {
    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, BrokerError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Publica reintentando hasta `attempts` veces, sin backoff
pub fn publish_with_retry(
    channel: &mut dyn Channel,
    queue: &str,
    body: &[u8],
    attempts: usize,
) -> Result<(), BrokerError> {
    let mut attempt = 1;
    loop {
        match channel.publish(queue, body, true) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                tracing::warn!(queue, attempt, error = %e, "publish failed, retrying");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Loop de consumo: recibir → procesar → ack
///
/// El handler corre antes del ack; si el thread muere en el medio, el canal
/// se libera sin confirmar y el broker re-entrega el mensaje. Los errores del
/// handler se registran y el mensaje se confirma igual (un mensaje envenenado
/// se descarta en vez de reintentarse para siempre).
pub fn consume<F>(
    channel: &mut dyn Channel,
    queue: &str,
    shutdown: &Shutdown,
    mut handler: F,
) -> Result<(), BrokerError>
where
    F: FnMut(&mut dyn Channel, &Delivery) -> Result<(), crate::error::DispatchError>,
{
    while !shutdown.is_triggered() {
        let Some(delivery) = channel.get(queue, POLL_INTERVAL)? else {
            continue;
        };

        if let Err(e) = handler(&mut *channel, &delivery) {
            tracing::warn!(
                queue,
                tag = delivery.tag,
                redelivered = delivery.redelivered,
                error = %e,
                "message processing failed, dropping message"
            );
        }

        channel.ack(delivery.tag)?;
    }
    Ok(())
}
