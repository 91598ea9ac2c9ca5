//! # Registry de Traducciones
//! src/jobs/registry.rs
//!
//! Mapa `id → Job` compartido entre conexiones, consumidores de resultados y
//! el sweeper. Todas las secuencias leer-modificar-escribir corren bajo un
//! único lock; el canal con el que se publican los requests vive dentro del
//! mismo lock para que registrar y encolar sean una sola operación atómica.
//!
//! ## Visibilidad
//!
//! Un job es visible para su dueño y para `admin`. Para cualquier otro
//! usuario un job ajeno y un job inexistente son indistinguibles.

use crate::jobs::types::{Job, JobId, JobStatus, LanguagePair, NewJob, ADMIN_USER};
use crate::queue::{publish_with_retry, Broker, BrokerError, Channel, QueueMessage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Intentos por defecto para publicar en el broker
pub const DEFAULT_PUBLISH_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("translation not found")]
    NotFound,

    #[error("translation belongs to another user")]
    Forbidden,

    #[error("unsupported language pair: {0}")]
    UnsupportedPair(String),

    #[error("could not enqueue translation: {0}")]
    Enqueue(#[from] BrokerError),
}

/// Vista reducida para el listado administrativo
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    #[serde(skip)]
    pub id: JobId,
    pub status: JobStatus,
    pub owner: String,
}

/// Resultado de `get_translations`
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    /// Jobs completos de un usuario
    Owned(Vec<Job>),
    /// Todos los jobs, sólo estado y dueño
    All(Vec<JobSummary>),
}

impl Listing {
    pub fn len(&self) -> usize {
        match self {
            Listing::Owned(jobs) => jobs.len(),
            Listing::All(jobs) => jobs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Inner {
    jobs: HashMap<JobId, Job>,
    publisher: Box<dyn Channel>,
}

/// Registry central de jobs
pub struct Registry {
    inner: Mutex<Inner>,
    pairs: BTreeSet<LanguagePair>,
    publish_attempts: usize,
}

impl Registry {
    /// Crea el registry y declara una cola durable de requests por par
    pub fn new(
        broker: &dyn Broker,
        pairs: impl IntoIterator<Item = LanguagePair>,
        publish_attempts: usize,
    ) -> Result<Self, BrokerError> {
        let pairs: BTreeSet<LanguagePair> = pairs.into_iter().collect();
        let mut publisher = broker.channel()?;
        for pair in &pairs {
            publisher.declare(&pair.request_queue(), true)?;
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                publisher,
            }),
            pairs,
            publish_attempts: publish_attempts.max(1),
        })
    }

    /// Pares de idiomas soportados
    pub fn pairs(&self) -> impl Iterator<Item = &LanguagePair> {
        self.pairs.iter()
    }

    pub fn supports(&self, pair: &LanguagePair) -> bool {
        self.pairs.contains(pair)
    }

    /// Registra y encola un nuevo job
    ///
    /// Si el par no está soportado no se registra ni se encola nada. Si el
    /// publish falla tras los reintentos, el job tampoco queda registrado.
    pub fn add_translation(&self, new_job: NewJob) -> Result<Job, RegistryError> {
        let pair = LanguagePair::new(&new_job.lang_source, &new_job.lang_target)
            .map_err(|e| RegistryError::UnsupportedPair(e.0))?;
        if !self.supports(&pair) {
            return Err(RegistryError::UnsupportedPair(pair.to_string()));
        }

        let job = Job::new(new_job);
        let body = QueueMessage::Request { job: job.clone() }.encode()?;

        let mut inner = self.inner.lock();
        publish_with_retry(
            inner.publisher.as_mut(),
            &pair.request_queue(),
            &body,
            self.publish_attempts,
        )?;
        inner.jobs.insert(job.id.clone(), job.clone());

        tracing::debug!(job_id = %job.id, owner = %job.owner, pair = %pair, "translation registered");
        Ok(job)
    }

    /// Lista los jobs visibles para `user_id`
    pub fn get_translations(&self, user_id: &str) -> Listing {
        let inner = self.inner.lock();

        if user_id == ADMIN_USER {
            let mut all: Vec<JobSummary> = inner
                .jobs
                .values()
                .map(|job| JobSummary {
                    id: job.id.clone(),
                    status: job.status,
                    owner: job.owner.clone(),
                })
                .collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            return Listing::All(all);
        }

        let mut owned: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.owner == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|job| job.date_submission);
        Listing::Owned(owned)
    }

    /// Obtiene un job si `user_id` puede verlo
    pub fn get_translation(&self, user_id: &str, id: &str) -> Result<Job, RegistryError> {
        let inner = self.inner.lock();
        let job = inner.jobs.get(id).ok_or(RegistryError::NotFound)?;
        if !job.is_visible_to(user_id) {
            return Err(RegistryError::Forbidden);
        }
        Ok(job.clone())
    }

    /// Elimina y retorna un job si `user_id` es su dueño o admin
    pub fn remove_translation(&self, user_id: &str, id: &str) -> Result<Job, RegistryError> {
        let mut inner = self.inner.lock();
        match inner.jobs.get(id) {
            None => return Err(RegistryError::NotFound),
            Some(job) if !job.is_visible_to(user_id) => return Err(RegistryError::Forbidden),
            Some(_) => {}
        }
        inner.jobs.remove(id).ok_or(RegistryError::NotFound)
    }

    /// Avanza el estado de un job
    ///
    /// No-op si el job no existe (p. ej. lo eliminó el sweeper) o si el
    /// estado pedido no es posterior al actual.
    pub fn update_status(&self, id: &str, status: JobStatus) -> bool {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(id) {
            Some(job) if job.status.can_advance_to(status) => {
                job.status = status;
                true
            }
            _ => false,
        }
    }

    /// Guarda la traducción y marca el job como PROCESSED
    pub fn update_text(&self, id: &str, text: String) -> bool {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(id) {
            Some(job) => job.mark_processed(text, Utc::now()),
            None => false,
        }
    }

    /// Elimina los jobs con más de `max_age_secs` desde su submission,
    /// sin importar su estado. Retorna los IDs eliminados.
    pub fn expire(&self, max_age_secs: u64, now: DateTime<Utc>) -> Vec<JobId> {
        let max_age = i64::try_from(max_age_secs).unwrap_or(i64::MAX);
        let mut inner = self.inner.lock();

        let expired: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|job| job.age_secs(now) > max_age)
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            inner.jobs.remove(id);
        }
        expired
    }

    /// Número de jobs registrados
    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
