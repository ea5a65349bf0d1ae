//! # Respuestas HTTP/1.1
//!
//! La aplicación devuelve un `Response` (status, headers, body) y este
//! módulo lo convierte en el status line + headers que van por el socket.
//! El body no se copia aquí: `server::client` lo envía por chunks.
//!
//! ## Formato
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Date: Sun, 06 Nov 1994 08:49:37 GMT\r\n
//! connection: close\r\n
//! content-length: 13\r\n
//! content-type: text/plain\r\n
//! last-modified: Sun, 06 Nov 1994 08:49:37 GMT\r\n
//! \r\n
//! ```
//!
//! ## Ejemplo de uso
//!
//! ```
//! use prefork_server::http::{Response, StatusCode};
//!
//! let response = Response::new(StatusCode::Ok)
//!     .with_header("Content-Type", "text/plain")
//!     .with_body(b"Hello, world!")
//!     .unwrap();
//! assert_eq!(response.header("content-length"), Some("13"));
//! ```

use super::body::Body;
use super::StatusCode;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::time::SystemTime;

/// Respuesta interina para `Expect: 100-continue`
pub const CONTINUE_RESPONSE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Respuesta fija para request heads malformados
pub const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Respuesta fija cuando la aplicación falla
pub const INTERNAL_SERVER_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n\r\n";

/// Respuesta producida por una aplicación
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Nombres en minúsculas
    pub headers: BTreeMap<String, String>,
    pub body: Body,
}

impl Response {
    /// Respuesta sin headers ni body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Body::new(),
        }
    }

    /// Agrega un header (el nombre se pasa a minúsculas; si existe, se
    /// sobrescribe)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.add_header(name, value);
        self
    }

    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Reemplaza el body y ajusta `content-length`
    pub fn with_body(mut self, bytes: &[u8]) -> io::Result<Self> {
        self.body = Body::from_bytes(bytes)?;
        self.sync_content_length();
        Ok(self)
    }

    /// Agrega bytes al final del body y ajusta `content-length`
    pub fn write_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.body.write_all(bytes)?;
        self.sync_content_length();
        Ok(())
    }

    /// Fija `content-length` al tamaño real del body
    pub fn sync_content_length(&mut self) {
        let len = self.body.len().to_string();
        self.headers.insert("content-length".to_string(), len);
    }

    /// Content-Length declarado (0 si falta o no es numérico)
    pub fn content_length(&self) -> u64 {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Formato RFC 1123 con sufijo " GMT"
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Serializa status line y headers.
///
/// Antes de serializar ajusta los headers:
/// - siempre agrega `connection: close`
/// - quita `content-type` si `content-length` es 0
/// - agrega `last-modified` con la hora `now` si no viene
pub fn serialize_response(
    status: StatusCode,
    headers: &mut BTreeMap<String, String>,
    now: SystemTime,
) -> Vec<u8> {
    headers.insert("connection".to_string(), "close".to_string());

    let content_length: u64 = headers
        .get("content-length")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    if content_length == 0 {
        headers.remove("content-type");
    }

    let date = http_date(now);
    headers
        .entry("last-modified".to_string())
        .or_insert_with(|| date.clone());

    let mut out = format!(
        "HTTP/1.1 {} {}\r\nDate: {}\r\n",
        status.as_u16(),
        status.reason_phrase(),
        date
    );
    for (name, value) in headers.iter() {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.into_bytes()
}
