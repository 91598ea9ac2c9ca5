//! # Límite de Conexiones
//! src/server/limiter.rs
//!
//! Semáforo contador para el acceptor: mientras haya `max` conexiones
//! atendiéndose, `acquire` bloquea y las conexiones nuevas esperan en el
//! backlog del kernel. La espera se corta si se activa el apagado.

use crate::shutdown::Shutdown;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Cada cuánto se revisa la señal de apagado mientras se espera lugar
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ConnectionLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    active: Mutex<usize>,
    released: Condvar,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                active: Mutex::new(0),
                released: Condvar::new(),
                max: max.max(1),
            }),
        }
    }

    /// Bloquea hasta que haya lugar y reserva una conexión
    ///
    /// Retorna `None` si se activa `shutdown` durante la espera.
    pub fn acquire(&self, shutdown: &Shutdown) -> Option<ConnectionPermit> {
        let mut active = self.inner.active.lock();
        while *active >= self.inner.max {
            if shutdown.is_triggered() {
                return None;
            }
            self.inner.released.wait_for(&mut active, SHUTDOWN_POLL);
        }
        *active += 1;
        Some(ConnectionPermit {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Reserva una conexión sólo si hay lugar
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        let mut active = self.inner.active.lock();
        if *active >= self.inner.max {
            return None;
        }
        *active += 1;
        Some(ConnectionPermit {
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn active(&self) -> usize {
        *self.inner.active.lock()
    }

    pub fn max(&self) -> usize {
        self.inner.max
    }
}

/// Reserva de una conexión; se libera al soltarla
pub struct ConnectionPermit {
    inner: Arc<Inner>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut active = self.inner.active.lock();
        *active = active.saturating_sub(1);
        self.inner.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_permits_are_bounded() {
        let limiter = ConnectionLimiter::new(2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.active(), 2);

        drop(a);
        assert_eq!(limiter.active(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let limiter = ConnectionLimiter::new(1);
        let shutdown = Shutdown::new();
        let permit = limiter.acquire(&shutdown).unwrap();

        let waiter = thread::spawn({
            let limiter = limiter.clone();
            let shutdown = shutdown.clone();
            move || limiter.acquire(&shutdown).is_some()
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        drop(permit);
        assert!(waiter.join().unwrap());
        assert_eq!(limiter.active(), 0);
    }

    #[test]
    fn test_acquire_gives_up_on_shutdown() {
        let limiter = ConnectionLimiter::new(1);
        let shutdown = Shutdown::new();
        let _permit = limiter.acquire(&shutdown).unwrap();

        let waiter = thread::spawn({
            let limiter = limiter.clone();
            let shutdown = shutdown.clone();
            move || limiter.acquire(&shutdown).is_none()
        });

        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        assert!(waiter.join().unwrap());
        assert_eq!(limiter.active(), 1);
    }

    #[test]
    fn test_zero_max_is_clamped() {
        assert_eq!(ConnectionLimiter::new(0).max(), 1);
    }
}
