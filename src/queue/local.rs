//! # Broker Local
//! src/queue/local.rs
//!
//! Implementación en proceso del broker: colas FIFO thread-safe con
//! `Condvar` para despertar consumidores, entregas pendientes de `ack` por
//! canal y un journal opcional en disco para las colas durables.
//!
//! El journal se reescribe completo (archivo temporal + rename atómico) tras
//! cada cambio en una cola durable. Al reabrirlo, todo mensaje que estaba
//! listo o sin confirmar vuelve a la cola como listo.

use crate::queue::{Broker, BrokerError, Channel, Delivery, DeliveryTag};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Mensaje almacenado en una cola
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    body: Vec<u8>,
    persistent: bool,
    #[serde(default)]
    redelivered: bool,
}

/// Entrega en vuelo
struct Unacked {
    channel: u64,
    message: StoredMessage,
}

struct QueueState {
    durable: bool,
    ready: VecDeque<StoredMessage>,
    unacked: BTreeMap<DeliveryTag, Unacked>,
}

impl QueueState {
    fn new(durable: bool) -> Self {
        Self {
            durable,
            ready: VecDeque::new(),
            unacked: BTreeMap::new(),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    next_tag: DeliveryTag,
}

/// Formato en disco del journal
#[derive(Debug, Default, Serialize, Deserialize)]
struct Journal {
    queues: BTreeMap<String, Vec<StoredMessage>>,
}

struct Shared {
    state: Mutex<BrokerState>,
    available: Condvar,
    journal_path: Option<PathBuf>,
    next_channel: AtomicU64,
}

impl Shared {
    /// Guarda las colas durables (se llama con el lock tomado)
    fn persist(&self, state: &BrokerState) -> Result<(), BrokerError> {
        let Some(path) = &self.journal_path else {
            return Ok(());
        };

        let mut journal = Journal::default();
        for (name, queue) in state.queues.iter().filter(|(_, q)| q.durable) {
            // Los no confirmados son más viejos que los listos
            let messages = queue
                .unacked
                .values()
                .map(|u| StoredMessage {
                    redelivered: true,
                    ..u.message.clone()
                })
                .chain(queue.ready.iter().cloned())
                .filter(|m| m.persistent)
                .collect();
            journal.queues.insert(name.clone(), messages);
        }

        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &journal)?;
        writer.flush()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Broker en proceso
#[derive(Clone)]
pub struct LocalBroker {
    shared: Arc<Shared>,
}

impl LocalBroker {
    /// Broker sólo en memoria: nada sobrevive al proceso
    pub fn in_memory() -> Self {
        Self::with_state(BrokerState::default(), None)
    }

    /// Broker con journal en `path`, restaurando lo que haya guardado
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref().to_path_buf();
        let mut state = BrokerState::default();

        if path.exists() {
            let journal = Self::load_journal(&path)?;
            for (name, messages) in journal.queues {
                let mut queue = QueueState::new(true);
                queue.ready.extend(messages);
                state.queues.insert(name, queue);
            }
        }

        let broker = Self::with_state(state, Some(path));
        {
            let state = broker.shared.state.lock();
            broker.shared.persist(&state)?;
        }
        Ok(broker)
    }

    fn load_journal(path: &Path) -> Result<Journal, BrokerError> {
        let file = File::open(path)?;
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(journal) => Ok(journal),
            Err(e) => {
                // Journal corrupto: empezar limpio
                tracing::warn!(path = %path.display(), error = %e, "broker journal unreadable, starting empty");
                Ok(Journal::default())
            }
        }
    }

    fn with_state(state: BrokerState, journal_path: Option<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                available: Condvar::new(),
                journal_path,
                next_channel: AtomicU64::new(1),
            }),
        }
    }

    /// Abre un canal concreto (sin boxing)
    pub fn open_channel(&self) -> LocalChannel {
        LocalChannel {
            id: self.shared.next_channel.fetch_add(1, Ordering::Relaxed),
            shared: Arc::clone(&self.shared),
            prefetch: 0,
            outstanding: HashMap::new(),
        }
    }

    /// `(listos, sin ack)` de una cola, o `None` si no existe
    pub fn depth(&self, queue: &str) -> Option<(usize, usize)> {
        let state = self.shared.state.lock();
        state
            .queues
            .get(queue)
            .map(|q| (q.ready.len(), q.unacked.len()))
    }

    /// Nombres de las colas declaradas
    pub fn queue_names(&self) -> Vec<String> {
        let state = self.shared.state.lock();
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Broker for LocalBroker {
    fn channel(&self) -> Result<Box<dyn Channel>, BrokerError> {
        Ok(Box::new(self.open_channel()))
    }
}

/// Canal de un consumidor/productor sobre el `LocalBroker`
pub struct LocalChannel {
    id: u64,
    shared: Arc<Shared>,
    /// 0 = sin límite
    prefetch: usize,
    /// tag → cola de las entregas sin confirmar
    outstanding: HashMap<DeliveryTag, String>,
}

impl LocalChannel {
    fn at_prefetch_limit(&self) -> bool {
        self.prefetch > 0 && self.outstanding.len() >= self.prefetch
    }
}

impl Channel for LocalChannel {
    fn declare(&mut self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock();
        if state.queues.contains_key(queue) {
            return Ok(());
        }
        state
            .queues
            .insert(queue.to_string(), QueueState::new(durable));
        if durable {
            self.shared.persist(&state)?;
        }
        Ok(())
    }

    fn publish(&mut self, queue: &str, body: &[u8], persistent: bool) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock();
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        let journaled = entry.durable && persistent;
        entry.ready.push_back(StoredMessage {
            body: body.to_vec(),
            persistent,
            redelivered: false,
        });

        if journaled {
            if let Err(e) = self.shared.persist(&state) {
                // No quedó en disco: el publish no ocurrió
                if let Some(entry) = state.queues.get_mut(queue) {
                    entry.ready.pop_back();
                }
                return Err(e);
            }
        }

        // El condvar es compartido por todas las colas
        self.shared.available.notify_all();
        Ok(())
    }

    fn qos(&mut self, prefetch: usize) {
        self.prefetch = prefetch;
    }

    fn get(&mut self, queue: &str, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();

        loop {
            if !state.queues.contains_key(queue) {
                return Err(BrokerError::UnknownQueue(queue.to_string()));
            }

            if !self.at_prefetch_limit() {
                let tag = state.next_tag + 1;
                let entry = state
                    .queues
                    .get_mut(queue)
                    .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

                if let Some(message) = entry.ready.pop_front() {
                    let delivery = Delivery {
                        tag,
                        queue: queue.to_string(),
                        body: message.body.clone(),
                        redelivered: message.redelivered,
                    };
                    entry.unacked.insert(
                        tag,
                        Unacked {
                            channel: self.id,
                            message,
                        },
                    );
                    state.next_tag = tag;
                    self.outstanding.insert(tag, queue.to_string());

                    // El journal no cambia: el mensaje sigue guardado como listo
                    return Ok(Some(delivery));
                }
            }

            if self
                .shared
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(None);
            }
        }
    }

    fn ack(&mut self, tag: DeliveryTag) -> Result<(), BrokerError> {
        let queue = self
            .outstanding
            .remove(&tag)
            .ok_or(BrokerError::UnknownDelivery(tag))?;

        let mut state = self.shared.state.lock();
        let journaled = match state.queues.get_mut(&queue) {
            Some(entry) => match entry.unacked.remove(&tag) {
                Some(unacked) => entry.durable && unacked.message.persistent,
                None => return Err(BrokerError::UnknownDelivery(tag)),
            },
            None => return Err(BrokerError::UnknownQueue(queue)),
        };

        if journaled {
            self.shared.persist(&state)?;
        }
        Ok(())
    }
}

impl Drop for LocalChannel {
    /// Las entregas sin `ack` vuelven al frente de su cola
    fn drop(&mut self) {
        if self.outstanding.is_empty() {
            return;
        }

        let mut state = self.shared.state.lock();
        let mut requeued = 0usize;

        for entry in state.queues.values_mut() {
            let tags: Vec<DeliveryTag> = entry
                .unacked
                .iter()
                .filter(|(_, u)| u.channel == self.id)
                .map(|(tag, _)| *tag)
                .collect();

            // Reinsertar en orden inverso para conservar el orden original
            for tag in tags.into_iter().rev() {
                if let Some(unacked) = entry.unacked.remove(&tag) {
                    let mut message = unacked.message;
                    message.redelivered = true;
                    entry.ready.push_front(message);
                    requeued += 1;
                }
            }
        }

        if let Err(e) = self.shared.persist(&state) {
            tracing::error!(error = %e, "failed to persist broker journal after requeue");
        }
        tracing::debug!(channel = self.id, requeued, "channel closed with unacked deliveries");
        self.shared.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    fn declared(broker: &LocalBroker, queue: &str) -> LocalChannel {
        let mut channel = broker.open_channel();
        channel.declare(queue, true).unwrap();
        channel
    }

    // ==================== FIFO ====================

    #[test]
    fn test_fifo_order() {
        let broker = LocalBroker::in_memory();
        let mut channel = declared(&broker, "q");

        channel.publish("q", b"1", true).unwrap();
        channel.publish("q", b"2", true).unwrap();
        channel.publish("q", b"3", true).unwrap();

        for expected in [b"1", b"2", b"3"] {
            let delivery = channel.get("q", WAIT).unwrap().unwrap();
            assert_eq!(delivery.body, expected);
            channel.ack(delivery.tag).unwrap();
        }
        assert!(channel.get("q", WAIT).unwrap().is_none());
    }

    #[test]
    fn test_publish_to_undeclared_queue_fails() {
        let broker = LocalBroker::in_memory();
        let mut channel = broker.open_channel();
        assert!(matches!(
            channel.publish("missing", b"x", true),
            Err(BrokerError::UnknownQueue(_))
        ));
    }

    #[test]
    fn test_declare_is_idempotent() {
        let broker = LocalBroker::in_memory();
        let mut channel = declared(&broker, "q");
        channel.publish("q", b"1", true).unwrap();
        channel.declare("q", true).unwrap();
        assert_eq!(broker.depth("q"), Some((1, 0)));
    }

    // ==================== Prefetch ====================

    #[test]
    fn test_prefetch_limits_unacked() {
        let broker = LocalBroker::in_memory();
        let mut channel = declared(&broker, "q");
        channel.qos(1);
        channel.publish("q", b"1", true).unwrap();
        channel.publish("q", b"2", true).unwrap();

        let first = channel.get("q", WAIT).unwrap().unwrap();
        // Con una entrega sin ack no recibe la segunda
        assert!(channel.get("q", WAIT).unwrap().is_none());

        channel.ack(first.tag).unwrap();
        let second = channel.get("q", WAIT).unwrap().unwrap();
        assert_eq!(second.body, b"2");
    }

    #[test]
    fn test_other_channel_gets_next_while_first_busy() {
        let broker = LocalBroker::in_memory();
        let mut a = declared(&broker, "q");
        let mut b = broker.open_channel();
        a.qos(1);
        b.qos(1);
        a.publish("q", b"1", true).unwrap();
        a.publish("q", b"2", true).unwrap();

        assert_eq!(a.get("q", WAIT).unwrap().unwrap().body, b"1");
        assert_eq!(b.get("q", WAIT).unwrap().unwrap().body, b"2");
        assert_eq!(broker.depth("q"), Some((0, 2)));
    }

    // ==================== Redelivery ====================

    #[test]
    fn test_unacked_message_redelivered_after_channel_drop() {
        let broker = LocalBroker::in_memory();
        let mut producer = declared(&broker, "q");
        producer.publish("q", b"job-1", true).unwrap();

        {
            // Worker que recibe y "se cae" antes del ack
            let mut crashed = broker.open_channel();
            let delivery = crashed.get("q", WAIT).unwrap().unwrap();
            assert!(!delivery.redelivered);
            assert_eq!(broker.depth("q"), Some((0, 1)));
        }

        let mut survivor = broker.open_channel();
        let delivery = survivor.get("q", WAIT).unwrap().unwrap();
        assert_eq!(delivery.body, b"job-1");
        assert!(delivery.redelivered);
    }

    #[test]
    fn test_acked_message_not_redelivered() {
        let broker = LocalBroker::in_memory();
        let mut producer = declared(&broker, "q");
        producer.publish("q", b"job-1", true).unwrap();

        {
            let mut worker = broker.open_channel();
            let delivery = worker.get("q", WAIT).unwrap().unwrap();
            worker.ack(delivery.tag).unwrap();
        }

        let mut other = broker.open_channel();
        assert!(other.get("q", WAIT).unwrap().is_none());
    }

    #[test]
    fn test_ack_unknown_tag() {
        let broker = LocalBroker::in_memory();
        let mut channel = declared(&broker, "q");
        assert!(matches!(
            channel.ack(42),
            Err(BrokerError::UnknownDelivery(42))
        ));
    }

    #[test]
    fn test_get_wakes_on_publish() {
        let broker = LocalBroker::in_memory();
        let _ = declared(&broker, "q");

        let t = std::thread::spawn({
            let broker = broker.clone();
            move || {
                let mut consumer = broker.open_channel();
                consumer.get("q", Duration::from_secs(10)).unwrap()
            }
        });

        std::thread::sleep(Duration::from_millis(30));
        let mut producer = broker.open_channel();
        producer.publish("q", b"late", true).unwrap();

        let delivery = t.join().unwrap().unwrap();
        assert_eq!(delivery.body, b"late");
    }

    #[test]
    fn test_publish_wakes_waiter_on_other_queue() {
        let broker = LocalBroker::in_memory();
        let _ = declared(&broker, "a");
        let _ = declared(&broker, "b");

        let waiter = |queue: &'static str| {
            let broker = broker.clone();
            std::thread::spawn(move || {
                let mut consumer = broker.open_channel();
                let started = Instant::now();
                let delivery = consumer.get(queue, Duration::from_secs(2)).unwrap();
                (delivery, started.elapsed())
            })
        };
        let on_a = waiter("a");
        let on_b = waiter("b");

        std::thread::sleep(Duration::from_millis(50));
        let mut producer = broker.open_channel();
        producer.publish("b", b"for-b", true).unwrap();

        let (delivery, elapsed) = on_b.join().unwrap();
        assert_eq!(delivery.unwrap().body, b"for-b");
        assert!(elapsed < Duration::from_secs(1));

        producer.publish("a", b"for-a", true).unwrap();
        let (delivery, _) = on_a.join().unwrap();
        assert_eq!(delivery.unwrap().body, b"for-a");
    }

    // ==================== Journal ====================

    #[test]
    fn test_journal_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");

        {
            let broker = LocalBroker::open(&path).unwrap();
            let mut channel = declared(&broker, "trans_req_ja-en");
            channel.publish("trans_req_ja-en", b"a", true).unwrap();
            channel.publish("trans_req_ja-en", b"b", true).unwrap();

            // Una entrega sin ack al momento del "crash"
            let delivery = channel.get("trans_req_ja-en", WAIT).unwrap().unwrap();
            assert_eq!(delivery.body, b"a");
            std::mem::forget(channel);
        }

        let broker = LocalBroker::open(&path).unwrap();
        assert_eq!(broker.depth("trans_req_ja-en"), Some((2, 0)));

        let mut channel = broker.open_channel();
        let first = channel.get("trans_req_ja-en", WAIT).unwrap().unwrap();
        assert_eq!(first.body, b"a");
        channel.ack(first.tag).unwrap();
        let second = channel.get("trans_req_ja-en", WAIT).unwrap().unwrap();
        assert_eq!(second.body, b"b");
    }

    #[test]
    fn test_get_does_not_rewrite_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");
        let broker = LocalBroker::open(&path).unwrap();
        let mut channel = declared(&broker, "q");
        channel.publish("q", b"a", true).unwrap();
        let before = fs::read(&path).unwrap();

        let delivery = channel.get("q", WAIT).unwrap().unwrap();
        assert_eq!(fs::read(&path).unwrap(), before);

        channel.ack(delivery.tag).unwrap();
        assert_ne!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_journal_skips_transient_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");

        {
            let broker = LocalBroker::open(&path).unwrap();
            let mut channel = declared(&broker, "q");
            channel.publish("q", b"persistent", true).unwrap();
            channel.publish("q", b"transient", false).unwrap();

            let mut volatile = broker.open_channel();
            volatile.declare("tmp", false).unwrap();
            volatile.publish("tmp", b"x", true).unwrap();
        }

        let broker = LocalBroker::open(&path).unwrap();
        assert_eq!(broker.depth("q"), Some((1, 0)));
        assert_eq!(broker.depth("tmp"), None);
    }

    #[test]
    fn test_corrupted_journal_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.json");
        fs::write(&path, b"{ not json").unwrap();

        let broker = LocalBroker::open(&path).unwrap();
        assert!(broker.queue_names().is_empty());
    }
}
