//! # Consumidor de Resultados
//! src/worker/results.rs
//!
//! Corre del lado del dispatcher, uno por par de idiomas. Aplica sobre el
//! registry los mensajes de `trans_resp_{pair}` y hace ack después de que
//! la actualización quedó hecha.

use crate::error::{DispatchError, Result};
use crate::jobs::registry::Registry;
use crate::jobs::types::{JobStatus, LanguagePair};
use crate::queue::{Broker, Channel, Delivery, QueueMessage};
use crate::shutdown::Shutdown;
use crate::worker::consume_until_shutdown;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct ResultConsumer {
    pair: LanguagePair,
    registry: Arc<Registry>,
}

impl ResultConsumer {
    pub fn new(pair: LanguagePair, registry: Arc<Registry>) -> Self {
        Self { pair, registry }
    }

    /// Aplica un mensaje de resultado; IDs desconocidos son no-op
    pub fn handle(&self, _channel: &mut dyn Channel, delivery: &Delivery) -> Result<()> {
        match QueueMessage::decode(&delivery.body)? {
            QueueMessage::Processing { id } => {
                if !self.registry.update_status(&id, JobStatus::Processing) {
                    tracing::debug!(job_id = %id, "processing notice ignored");
                }
            }
            QueueMessage::Result { id, translated_text } => {
                if self.registry.update_text(&id, translated_text) {
                    tracing::info!(job_id = %id, pair = %self.pair, "translation processed");
                } else {
                    tracing::warn!(job_id = %id, "result for unknown or finished translation dropped");
                }
            }
            QueueMessage::Request { job } => {
                return Err(DispatchError::Internal(format!(
                    "request {} found on response queue",
                    job.id
                )));
            }
        }
        Ok(())
    }

    pub fn spawn(self, broker: Arc<dyn Broker>, shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("results-{}", self.pair))
            .spawn(move || {
                let queue = self.pair.response_queue();
                tracing::info!(%queue, "result consumer started");
                consume_until_shutdown(broker.as_ref(), &queue, &shutdown, |channel, delivery| {
                    self.handle(channel, delivery)
                });
                tracing::info!(%queue, "result consumer stopped");
            })
    }
}
