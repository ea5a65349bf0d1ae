//! # Body de Requests y Responses
//! src/http/body.rs
//!
//! Stream de bytes que vive en memoria hasta `SPOOL_LIMIT` y después pasa a
//! un archivo temporal, para no cargar bodies grandes enteros en RAM.

use std::io::{self, Read, Seek, SeekFrom, Write};
use tempfile::SpooledTempFile;

/// Bytes que se mantienen en memoria antes de pasar a disco
pub const SPOOL_LIMIT: usize = 2 * 1024 * 1024;

/// Body bufferizado con longitud conocida
#[derive(Debug)]
pub struct Body {
    inner: SpooledTempFile,
    len: u64,
}

impl Body {
    /// Body vacío
    pub fn new() -> Self {
        Self {
            inner: SpooledTempFile::new(SPOOL_LIMIT),
            len: 0,
        }
    }

    /// Body con el contenido dado, posicionado al inicio
    ///
    /// # Ejemplo
    /// ```
    /// use prefork_server::http::Body;
    ///
    /// let body = Body::from_bytes(b"Hello, world!").unwrap();
    /// assert_eq!(body.len(), 13);
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut body = Self::new();
        body.write_all(bytes)?;
        body.rewind()?;
        Ok(body)
    }

    /// Tamaño total en bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Vuelve al inicio para leer
    pub fn rewind(&mut self) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// ¿Ya se pasó a un archivo temporal?
    pub fn is_spilled(&self) -> bool {
        self.inner.is_rolled()
    }

    /// Lee todo el contenido desde el inicio
    pub fn to_vec(&mut self) -> io::Result<Vec<u8>> {
        self.rewind()?;
        let mut out = Vec::with_capacity(self.len as usize);
        self.inner.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for Body {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let pos = self.inner.stream_position()?;
        let n = self.inner.write(buf)?;
        self.len = self.len.max(pos + n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Seek for Body {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body() {
        let body = Body::new();
        assert!(body.is_empty());
        assert_eq!(body.len(), 0);
    }

    #[test]
    fn test_write_then_read() {
        let mut body = Body::new();
        body.write_all(b"hello ").unwrap();
        body.write_all(b"world").unwrap();
        assert_eq!(body.len(), 11);
        assert_eq!(body.to_vec().unwrap(), b"hello world");
    }

    #[test]
    fn test_overwrite_does_not_grow_len() {
        let mut body = Body::from_bytes(b"abcdef").unwrap();
        body.write_all(b"XY").unwrap();
        assert_eq!(body.len(), 6);
        assert_eq!(body.to_vec().unwrap(), b"XYcdef");
    }

    #[test]
    fn test_large_body_spills_to_disk() {
        let mut body = Body::new();
        let chunk = vec![b'x'; 64 * 1024];
        while body.len() <= SPOOL_LIMIT as u64 {
            body.write_all(&chunk).unwrap();
        }
        assert!(body.is_spilled());
        assert_eq!(body.to_vec().unwrap().len() as u64, body.len());
    }
}
