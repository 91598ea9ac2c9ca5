//! # Servidor TCP Concurrente
//! src/server/tcp.rs
//!
//! Implementación del listener que maneja múltiples conexiones simultáneas
//! usando threads. Cada conexión se procesa en su propio thread y atiende un
//! único request: leer frame → router → escribir respuesta → cerrar.

use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::protocol::{write_frame, FrameError, FrameReader};
use crate::router::Router;
use crate::server::limiter::{ConnectionLimiter, ConnectionPermit};
use crate::shutdown::Shutdown;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Servidor del protocolo enmarcado
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    metrics: MetricsCollector,
    limiter: ConnectionLimiter,
    read_timeout: Option<Duration>,
    max_frame_bytes: usize,
    shutdown: Shutdown,
}

impl Server {
    /// Hace bind en la dirección configurada
    pub fn bind(
        config: &Config,
        router: Arc<Router>,
        metrics: MetricsCollector,
        shutdown: Shutdown,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(config.address())?;
        Ok(Self {
            listener,
            router,
            metrics,
            limiter: ConnectionLimiter::new(config.max_connections),
            read_timeout: config.read_timeout(),
            max_frame_bytes: config.max_frame_bytes,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Loop de aceptación; termina cuando se activa la señal de apagado
    /// (se revisa después de cada `accept`)
    pub fn run(&self) -> io::Result<()> {
        let address = self.local_addr()?;
        tracing::info!(%address, max_connections = self.limiter.max(), "listening for requests");

        loop {
            // Con el límite alcanzado no se acepta nada nuevo
            let Some(permit) = self.limiter.acquire(&self.shutdown) else {
                break;
            };

            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if self.shutdown.is_triggered() {
                break;
            }

            self.spawn_connection(stream, peer, permit);
        }

        tracing::info!(%address, "listener stopped");
        Ok(())
    }

    /// Corre el loop de aceptación en su propio thread
    pub fn spawn(self) -> io::Result<JoinHandle<io::Result<()>>> {
        thread::Builder::new()
            .name("listener".to_string())
            .spawn(move || self.run())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let router = Arc::clone(&self.router);
        let metrics = self.metrics.clone();
        let read_timeout = self.read_timeout;
        let max_frame_bytes = self.max_frame_bytes;

        tracing::debug!(%peer, "connection accepted");
        metrics.increment_active_connections();

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", peer))
            .spawn(move || {
                let _permit = permit;
                if let Err(e) =
                    handle_connection(stream, &router, &metrics, read_timeout, max_frame_bytes)
                {
                    tracing::warn!(%peer, error = %e, "connection failed");
                }
                metrics.decrement_active_connections();
            });

        if let Err(e) = spawned {
            // El closure (y con él el permit) ya se liberó
            tracing::error!(%peer, error = %e, "could not spawn connection thread");
            self.metrics.decrement_active_connections();
        }
    }
}

/// Atiende un request en una conexión ya aceptada
pub fn handle_connection(
    mut stream: TcpStream,
    router: &Router,
    metrics: &MetricsCollector,
    read_timeout: Option<Duration>,
    max_frame_bytes: usize,
) -> io::Result<()> {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    stream.set_read_timeout(read_timeout)?;

    let frame = match FrameReader::with_limit(&stream, max_frame_bytes).read_frame() {
        Ok(frame) => frame,
        Err(FrameError::Closed) => {
            tracing::debug!(%peer, "connection closed without request");
            return Ok(());
        }
        Err(e) => {
            metrics.record_frame_rejected();
            tracing::info!(%peer, error = %e, "frame rejected");
            return Ok(());
        }
    };

    let start = Instant::now();
    tracing::debug!(%peer, request = %String::from_utf8_lossy(&frame), "request");

    match router.handle(&frame) {
        Ok(reply) => {
            let body = reply.body.to_string();
            tracing::debug!(%peer, response = %body, "response");
            write_frame(&mut stream, body.as_bytes())?;
            metrics.record_request(reply.action, start.elapsed());
        }
        Err(fault) => {
            match fault.fallback_reply() {
                Some(body) => {
                    tracing::info!(%peer, kind = fault.kind(), error = %fault, "request answered with empty result");
                    write_frame(&mut stream, body.to_string().as_bytes())?;
                }
                None => {
                    tracing::warn!(%peer, kind = fault.kind(), error = %fault, "request ignored");
                }
            }
            metrics.record_fault(fault.kind(), start.elapsed());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::registry::{Registry, DEFAULT_PUBLISH_ATTEMPTS};
    use crate::protocol::encode_frame;
    use crate::queue::LocalBroker;
    use std::io::{Read, Write};

    fn router() -> Arc<Router> {
        let broker = LocalBroker::in_memory();
        let registry =
            Registry::new(&broker, ["ja-en".parse().unwrap()], DEFAULT_PUBLISH_ATTEMPTS).unwrap();
        Arc::new(Router::new(Arc::new(registry)))
    }

    /// Atiende una conexión con `handle_connection` y retorna lo que
    /// recibió el cliente
    fn exchange(request: &[u8]) -> (Vec<u8>, MetricsCollector) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let router = router();
        let metrics = MetricsCollector::new();

        let t = thread::spawn({
            let metrics = metrics.clone();
            move || {
                let (stream, _) = listener.accept().unwrap();
                handle_connection(
                    stream,
                    &router,
                    &metrics,
                    Some(Duration::from_secs(5)),
                    1024,
                )
                .unwrap();
            }
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(request).unwrap();
        client.shutdown(std::net::Shutdown::Write).unwrap();

        // Si el servidor cierra con datos sin leer puede llegar un RST
        let mut buf = Vec::new();
        let _ = client.read_to_end(&mut buf);
        t.join().unwrap();
        (buf, metrics)
    }

    #[test]
    fn test_handle_connection_version() {
        let (reply, metrics) = exchange(&encode_frame(br#"{"action":"get_server_version"}"#));
        assert_eq!(reply, encode_frame(br#"{"server_version":"1.0"}"#));
        assert_eq!(metrics.snapshot().requests_per_action["get_server_version"], 1);
    }

    #[test]
    fn test_handle_connection_malformed_gets_no_reply() {
        let (reply, metrics) = exchange(&encode_frame(b"{not json"));
        assert!(reply.is_empty());
        assert_eq!(metrics.snapshot().faults["malformed"], 1);
    }

    #[test]
    fn test_handle_connection_unknown_translation_gets_empty_object() {
        let (reply, metrics) = exchange(&encode_frame(
            br#"{"action":"get_translation","user_id":"u1","translation_id":"nope"}"#,
        ));
        assert_eq!(reply, encode_frame(b"{}"));
        assert_eq!(metrics.snapshot().faults["unauthorized"], 1);
    }

    #[test]
    fn test_handle_connection_missing_delimiter() {
        let (reply, metrics) = exchange(br#"{"action":"get_server_version"}"#);
        assert!(reply.is_empty());
        assert_eq!(metrics.snapshot().frames_rejected, 1);
    }

    #[test]
    fn test_handle_connection_frame_too_large() {
        let mut request = vec![b' '; 2048];
        request.extend_from_slice(&encode_frame(b"{}"));
        let (reply, metrics) = exchange(&request);
        assert!(reply.is_empty());
        assert_eq!(metrics.snapshot().frames_rejected, 1);
    }

    #[test]
    fn test_handle_connection_peer_closed_immediately() {
        let (reply, metrics) = exchange(b"");
        assert!(reply.is_empty());
        assert_eq!(metrics.snapshot().frames_rejected, 0);
    }

    #[test]
    fn test_server_run_and_shutdown() {
        let mut config = Config::default();
        config.port = 0;
        let shutdown = Shutdown::new();
        let server = Server::bind(&config, router(), MetricsCollector::new(), shutdown.clone()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client
            .write_all(&encode_frame(br#"{"action":"get_server_status"}"#))
            .unwrap();
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, encode_frame(br#"{"server_status":"OK"}"#));

        // La señal se revisa tras el próximo accept
        shutdown.trigger();
        drop(TcpStream::connect(addr).unwrap());
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_shutdown_while_connection_limit_reached() {
        let mut config = Config::default();
        config.port = 0;
        config.max_connections = 1;
        config.read_timeout_ms = 0;
        let shutdown = Shutdown::new();
        let server = Server::bind(&config, router(), MetricsCollector::new(), shutdown.clone()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.spawn().unwrap();

        // Ocupa el único lugar sin mandar nada
        let idle = TcpStream::connect(addr).unwrap();
        thread::sleep(Duration::from_millis(100));

        shutdown.trigger();
        handle.join().unwrap().unwrap();
        drop(idle);
    }
}
