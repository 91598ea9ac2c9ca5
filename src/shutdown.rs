//! # Señal de Apagado
//! src/shutdown.rs
//!
//! Flag compartido entre los threads de fondo (sweeper, workers,
//! consumidores de resultados). Los loops lo consultan entre iteraciones y
//! las esperas largas usan `wait_timeout` para despertar en cuanto se activa.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activa la señal y despierta a todos los que esperan
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Duerme hasta `timeout` o hasta que se active la señal
    ///
    /// Retorna `true` si la señal está activa.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut triggered = flag.lock();
        if !*triggered {
            condvar.wait_while_for(&mut triggered, |t| !*t, timeout);
        }
        *triggered
    }
}
