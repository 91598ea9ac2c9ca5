//! # Workers de Traducción
//! src/worker/mod.rs
//!
//! Cada par de idiomas tiene un pool de workers; cada worker es un thread
//! con su propio canal al broker y prefetch 1:
//!
//! ```text
//! trans_req_{pair} ──get──▶ Worker ──▶ Segmenter ──▶ Translator
//!                             │
//!                             ├─ publish Processing{id} ──▶ trans_resp_{pair}
//!                             ├─ publish Result{id, text} ──▶ trans_resp_{pair}
//!                             └─ ack
//! ```
//!
//! El ack del request se hace después de publicar el resultado. Si el worker
//! muere antes, el broker re-entrega el request a otro worker.

pub mod results;
pub mod segmenter;
pub mod translator;

pub use results::ResultConsumer;
pub use segmenter::{Segmenter, SegmenterError};
pub use translator::{BackendEndpoint, TranslateError, Translator, TranslatorRegistry};

use crate::error::{DispatchError, Result};
use crate::jobs::types::LanguagePair;
use crate::queue::{self, publish_with_retry, Broker, Channel, Delivery, QueueMessage};
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Espera antes de reabrir un canal que falló
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Un worker de traducción para un par de idiomas
pub struct TranslationWorker {
    name: String,
    pair: LanguagePair,
    translator: Box<dyn Translator>,
    segmenter: Arc<Segmenter>,
    publish_attempts: usize,
}

impl TranslationWorker {
    pub fn new(
        name: String,
        pair: LanguagePair,
        translator: Box<dyn Translator>,
        segmenter: Arc<Segmenter>,
        publish_attempts: usize,
    ) -> Self {
        Self {
            name,
            pair,
            translator,
            segmenter,
            publish_attempts,
        }
    }

    /// Procesa un request: Processing → segmentar → traducir → Result
    pub fn handle(&self, channel: &mut dyn Channel, delivery: &Delivery) -> Result<()> {
        let start = Instant::now();
        let job = match QueueMessage::decode(&delivery.body)? {
            QueueMessage::Request { job } => job,
            other => {
                return Err(DispatchError::Internal(format!(
                    "unexpected message on request queue: {:?}",
                    other
                )))
            }
        };

        let response_queue = self.pair.response_queue();
        channel.declare(&response_queue, true)?;

        let processing = QueueMessage::Processing { id: job.id.clone() }.encode()?;
        publish_with_retry(channel, &response_queue, &processing, self.publish_attempts)?;

        tracing::debug!(worker = %self.name, job_id = %job.id, redelivered = delivery.redelivered, "translating");

        let segmented = self.segmenter.segment(&job.text_source)?;
        let translated_text = self.translator.submit(&segmented)?;

        let result = QueueMessage::Result {
            id: job.id.clone(),
            translated_text,
        }
        .encode()?;
        publish_with_retry(channel, &response_queue, &result, self.publish_attempts)?;

        tracing::info!(
            worker = %self.name,
            job_id = %job.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "translation finished"
        );
        Ok(())
    }

    /// Loop del worker hasta que se active `shutdown`
    pub fn run(self, broker: &dyn Broker, shutdown: &Shutdown) {
        tracing::info!(worker = %self.name, pair = %self.pair, "translation worker started");
        let request_queue = self.pair.request_queue();
        consume_until_shutdown(broker, &request_queue, shutdown, |channel, delivery| {
            self.handle(channel, delivery)
        });
        tracing::info!(worker = %self.name, "translation worker stopped");
    }
}

/// Abre un canal con prefetch 1 sobre `queue` y consume hasta el apagado,
/// reabriendo el canal si el broker falla
pub(crate) fn consume_until_shutdown<F>(
    broker: &dyn Broker,
    queue: &str,
    shutdown: &Shutdown,
    mut handler: F,
) where
    F: FnMut(&mut dyn Channel, &Delivery) -> Result<()>,
{
    while !shutdown.is_triggered() {
        let result = broker.channel().and_then(|mut channel| {
            channel.declare(queue, true)?;
            channel.qos(1);
            queue::consume(channel.as_mut(), queue, shutdown, &mut handler)
        });

        if let Err(e) = result {
            tracing::error!(queue, error = %e, "consumer channel failed, reopening");
            shutdown.wait_timeout(RECONNECT_DELAY);
        }
    }
}

/// Configuración de un pool para un par de idiomas
#[derive(Debug, Clone)]
pub struct PoolSpec {
    pub pair: LanguagePair,
    pub backend: String,
    pub endpoint: Option<BackendEndpoint>,
    pub workers: usize,
}

/// Lanza los workers de un par. Los backends se construyen antes de crear
/// cualquier thread, así un backend mal configurado falla al arrancar.
pub fn spawn_pool(
    broker: Arc<dyn Broker>,
    spec: &PoolSpec,
    translators: &TranslatorRegistry,
    segmenter: Arc<Segmenter>,
    publish_attempts: usize,
    shutdown: &Shutdown,
) -> Result<Vec<JoinHandle<()>>> {
    let mut workers = Vec::with_capacity(spec.workers);
    for index in 0..spec.workers {
        let translator = translators.create(&spec.backend, spec.endpoint.as_ref())?;
        workers.push(TranslationWorker::new(
            format!("{}-{}", spec.pair, index + 1),
            spec.pair.clone(),
            translator,
            Arc::clone(&segmenter),
            publish_attempts,
        ));
    }

    let mut handles = Vec::with_capacity(workers.len());
    for worker in workers {
        let broker = Arc::clone(&broker);
        let shutdown = shutdown.clone();
        let handle = thread::Builder::new()
            .name(format!("worker-{}", worker.name))
            .spawn(move || worker.run(broker.as_ref(), &shutdown))?;
        handles.push(handle);
    }

    tracing::info!(pair = %spec.pair, backend = %spec.backend, workers = handles.len(), "worker pool started");
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{Job, NewJob};
    use crate::queue::LocalBroker;
    use chrono::Utc;

    struct StubTranslator(&'static str);

    impl Translator for StubTranslator {
        fn submit(&self, _text: &str) -> std::result::Result<String, TranslateError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingTranslator;

    impl Translator for FailingTranslator {
        fn submit(&self, _text: &str) -> std::result::Result<String, TranslateError> {
            Err(TranslateError::UnexpectedResponse("backend down".to_string()))
        }
    }

    struct PanickingTranslator;

    impl Translator for PanickingTranslator {
        fn submit(&self, _text: &str) -> std::result::Result<String, TranslateError> {
            panic!("worker crashed mid-translation");
        }
    }

    fn ja_en() -> LanguagePair {
        "ja-en".parse().unwrap()
    }

    fn worker(translator: Box<dyn Translator>) -> TranslationWorker {
        TranslationWorker::new(
            "ja-en-test".to_string(),
            ja_en(),
            translator,
            Arc::new(Segmenter::passthrough().unwrap()),
            3,
        )
    }

    fn enqueue(broker: &LocalBroker) -> Job {
        let job = Job::new(NewJob {
            owner: "u1".to_string(),
            lang_source: "ja".to_string(),
            lang_target: "en".to_string(),
            text_source: "こんにちは".to_string(),
            date_submission: Utc::now(),
        });
        let mut channel = broker.open_channel();
        channel.declare("trans_req_ja-en", true).unwrap();
        channel
            .publish(
                "trans_req_ja-en",
                &QueueMessage::Request { job: job.clone() }.encode().unwrap(),
                true,
            )
            .unwrap();
        job
    }

    /// Lee todos los mensajes disponibles en la cola de resultados
    fn drain_results(broker: &LocalBroker, wait: Duration) -> Vec<QueueMessage> {
        let mut channel = broker.open_channel();
        channel.declare("trans_resp_ja-en", true).unwrap();
        let mut messages = Vec::new();
        while let Some(delivery) = channel.get("trans_resp_ja-en", wait).unwrap() {
            messages.push(QueueMessage::decode(&delivery.body).unwrap());
            channel.ack(delivery.tag).unwrap();
        }
        messages
    }

    // ==================== handle ====================

    #[test]
    fn test_handle_publishes_processing_then_result() {
        let broker = LocalBroker::in_memory();
        let job = enqueue(&broker);

        let mut channel = broker.open_channel();
        let delivery = channel
            .get("trans_req_ja-en", Duration::from_millis(100))
            .unwrap()
            .unwrap();
        worker(Box::new(StubTranslator("hello")))
            .handle(&mut channel, &delivery)
            .unwrap();

        let messages = drain_results(&broker, Duration::from_millis(50));
        assert_eq!(
            messages,
            vec![
                QueueMessage::Processing { id: job.id.clone() },
                QueueMessage::Result {
                    id: job.id,
                    translated_text: "hello".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_handle_backend_failure_publishes_no_result() {
        let broker = LocalBroker::in_memory();
        let job = enqueue(&broker);

        let mut channel = broker.open_channel();
        let delivery = channel
            .get("trans_req_ja-en", Duration::from_millis(100))
            .unwrap()
            .unwrap();
        let result = worker(Box::new(FailingTranslator)).handle(&mut channel, &delivery);
        assert!(matches!(result, Err(DispatchError::Translate(_))));

        // El job queda en PROCESSING hasta que lo elimine el sweeper
        let messages = drain_results(&broker, Duration::from_millis(50));
        assert_eq!(messages, vec![QueueMessage::Processing { id: job.id }]);
    }

    #[test]
    fn test_handle_rejects_unexpected_message() {
        let broker = LocalBroker::in_memory();
        let mut channel = broker.open_channel();
        let delivery = Delivery {
            tag: 1,
            queue: "trans_req_ja-en".to_string(),
            body: QueueMessage::Processing { id: "x".to_string() }
                .encode()
                .unwrap(),
            redelivered: false,
        };
        assert!(matches!(
            worker(Box::new(EchoForTests)).handle(&mut channel, &delivery),
            Err(DispatchError::Internal(_))
        ));
    }

    struct EchoForTests;

    impl Translator for EchoForTests {
        fn submit(&self, text: &str) -> std::result::Result<String, TranslateError> {
            Ok(text.to_string())
        }
    }

    // ==================== Pool ====================

    #[test]
    fn test_pool_processes_queue_and_acks() {
        let broker = LocalBroker::in_memory();
        let jobs: Vec<Job> = (0..5).map(|_| enqueue(&broker)).collect();

        let shutdown = Shutdown::new();
        let spec = PoolSpec {
            pair: ja_en(),
            backend: "echo".to_string(),
            endpoint: None,
            workers: 2,
        };
        let handles = spawn_pool(
            Arc::new(broker.clone()),
            &spec,
            &TranslatorRegistry::with_builtins(),
            Arc::new(Segmenter::passthrough().unwrap()),
            3,
            &shutdown,
        )
        .unwrap();
        assert_eq!(handles.len(), 2);

        let deadline = Instant::now() + Duration::from_secs(10);
        while broker.depth("trans_req_ja-en") != Some((0, 0)) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        shutdown.trigger();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(broker.depth("trans_req_ja-en"), Some((0, 0)));
        let results: Vec<String> = drain_results(&broker, Duration::from_millis(50))
            .into_iter()
            .filter_map(|m| match m {
                QueueMessage::Result { id, translated_text } => {
                    assert_eq!(translated_text, "こんにちは");
                    Some(id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), jobs.len());
    }

    #[test]
    fn test_spawn_pool_unknown_backend_fails_before_spawning() {
        let broker = LocalBroker::in_memory();
        let spec = PoolSpec {
            pair: ja_en(),
            backend: "tensorflow".to_string(),
            endpoint: None,
            workers: 1,
        };
        let result = spawn_pool(
            Arc::new(broker),
            &spec,
            &TranslatorRegistry::with_builtins(),
            Arc::new(Segmenter::passthrough().unwrap()),
            3,
            &Shutdown::new(),
        );
        assert!(matches!(result, Err(DispatchError::Translate(_))));
    }

    // ==================== At-least-once ====================

    #[test]
    fn test_crashed_worker_request_is_redelivered() {
        let broker = LocalBroker::in_memory();
        let job = enqueue(&broker);
        let shutdown = Shutdown::new();

        // Primer worker: muere con el mensaje sin confirmar
        let crashing = thread::spawn({
            let broker = broker.clone();
            let shutdown = shutdown.clone();
            move || worker(Box::new(PanickingTranslator)).run(&broker, &shutdown)
        });
        assert!(crashing.join().is_err());
        assert_eq!(broker.depth("trans_req_ja-en"), Some((1, 0)));

        // Segundo worker: recibe la re-entrega y la completa
        let healthy = thread::spawn({
            let broker = broker.clone();
            let shutdown = shutdown.clone();
            move || worker(Box::new(StubTranslator("hello"))).run(&broker, &shutdown)
        });

        let deadline = Instant::now() + Duration::from_secs(10);
        while broker.depth("trans_req_ja-en") != Some((0, 0)) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        shutdown.trigger();
        healthy.join().unwrap();

        let messages = drain_results(&broker, Duration::from_millis(50));
        assert!(messages.contains(&QueueMessage::Result {
            id: job.id,
            translated_text: "hello".to_string()
        }));
    }
}
