//! # Cliente de Referencia
//! src/protocol/client.rs
//!
//! Conecta, envía un request enmarcado y lee la respuesta hasta el
//! delimitador o hasta que el servidor cierre. Un request sin respuesta
//! (entrada inválida) se observa como timeout y retorna `Ok(None)`.

use crate::protocol::frame::{write_frame, FrameError, FrameReader};
use serde_json::Value;
use std::io;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("invalid reply: {0}")]
    InvalidReply(#[from] serde_json::Error),

    #[error("framing error: {0}")]
    Frame(FrameError),
}

/// Cliente del protocolo enmarcado
#[derive(Debug, Clone)]
pub struct Client {
    address: String,
    timeout: Duration,
}

impl Client {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Envía un request JSON y espera la respuesta
    pub fn request(&self, request: &Value) -> Result<Option<Value>, ClientError> {
        let payload = serde_json::to_vec(request)?;
        match self.request_raw(&payload)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Envía bytes arbitrarios como un frame
    pub fn request_raw(&self, payload: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        let mut stream = self.connect()?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(ClientError::Connect)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(ClientError::Connect)?;

        write_frame(&mut stream, payload).map_err(ClientError::Send)?;

        let mut reader = FrameReader::new(stream);
        match reader.read_frame() {
            Ok(frame) => {
                let _ = reader.into_inner().shutdown(Shutdown::Both);
                Ok(Some(frame))
            }
            // Sin respuesta: el servidor descartó el request
            Err(FrameError::Closed) => Ok(None),
            Err(FrameError::Io(e))
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(e) => Err(ClientError::Frame(e)),
        }
    }

    fn connect(&self) -> Result<TcpStream, ClientError> {
        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(ClientError::Connect)?;

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = e,
            }
        }
        Err(ClientError::Connect(last_error))
    }
}
