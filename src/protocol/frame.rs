//! # Framing por Delimitador
//! src/protocol/frame.rs
//!
//! Cada mensaje del protocolo es un objeto JSON en UTF-8 seguido del
//! delimitador literal `==== EOM ====`. No hay prefijo de longitud.
//!
//! ## Lectura
//!
//! ```text
//! chunk 1: {"action": "get_ser
//! chunk 2: ver_version"}==== E
//! chunk 3: OM ====
//! ```
//!
//! Después de cada lectura sólo se busca el delimitador en la parte nueva del
//! buffer más los últimos `DELIMITER.len() - 1` bytes anteriores, así un
//! delimitador partido entre lecturas se detecta sin re-escanear todo el
//! buffer (O(total de bytes)). Los bytes que vienen después del delimitador
//! quedan guardados para el siguiente frame.

use std::io::{self, Read, Write};
use thiserror::Error;

/// Delimitador reservado que termina cada mensaje
pub const DELIMITER: &[u8] = b"==== EOM ====";

/// Tamaño del buffer de recepción por llamada a `read`
pub const BUFFER_SIZE: usize = 4096;

/// Límite por defecto del tamaño de un frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Errores de framing
#[derive(Debug, Error)]
pub enum FrameError {
    /// El peer cerró la conexión sin mandar ningún byte
    #[error("connection closed before any data")]
    Closed,

    /// El stream terminó antes de ver el delimitador
    #[error("stream ended before delimiter ({buffered} bytes buffered)")]
    Incomplete { buffered: usize },

    /// El frame superó el tamaño máximo permitido
    #[error("frame exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Lector de frames sobre cualquier `Read`
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(BUFFER_SIZE),
            max_frame_bytes,
        }
    }

    /// Lee el siguiente frame completo (sin el delimitador)
    ///
    /// Bloquea hasta ver el delimitador o hasta que el stream termine.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        // Puede que un frame anterior haya dejado uno completo en el buffer
        if let Some(pos) = find_delimiter(&self.buffer, 0) {
            return Ok(self.take_frame(pos));
        }

        let mut chunk = [0u8; BUFFER_SIZE];

        loop {
            let bytes_read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FrameError::Io(e)),
            };

            if bytes_read == 0 {
                if self.buffer.is_empty() {
                    return Err(FrameError::Closed);
                }
                return Err(FrameError::Incomplete {
                    buffered: self.buffer.len(),
                });
            }

            let previous_len = self.buffer.len();
            self.buffer.extend_from_slice(&chunk[..bytes_read]);

            // Parte nueva + cola del chunk anterior
            let search_from = previous_len.saturating_sub(DELIMITER.len() - 1);
            if let Some(pos) = find_delimiter(&self.buffer, search_from) {
                if pos > self.max_frame_bytes {
                    return Err(FrameError::TooLarge {
                        limit: self.max_frame_bytes,
                    });
                }
                return Ok(self.take_frame(pos));
            }

            if self.buffer.len() > self.max_frame_bytes + DELIMITER.len() {
                return Err(FrameError::TooLarge {
                    limit: self.max_frame_bytes,
                });
            }
        }
    }

    /// Bytes recibidos después del último delimitador
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn take_frame(&mut self, pos: usize) -> Vec<u8> {
        let rest = self.buffer.split_off(pos + DELIMITER.len());
        let mut frame = std::mem::replace(&mut self.buffer, rest);
        frame.truncate(pos);
        frame
    }
}

/// Busca el delimitador a partir de `from`
fn find_delimiter(haystack: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < DELIMITER.len() || from > haystack.len() - DELIMITER.len() {
        return None;
    }
    haystack[from..]
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
        .map(|offset| from + offset)
}

/// Codifica un payload como frame listo para enviar
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + DELIMITER.len());
    framed.extend_from_slice(payload);
    framed.extend_from_slice(DELIMITER);
    framed
}

/// Escribe un frame en una sola escritura y hace flush
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&encode_frame(payload))?;
    writer.flush()
}
