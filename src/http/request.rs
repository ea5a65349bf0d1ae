//! # Parsing del Request Head HTTP/1.1
//! src/http/request.rs
//!
//! ## Formato
//!
//! ```text
//! GET /path?param1=value1 HTTP/1.1\r\n
//! Host: localhost:5000\r\n
//! User-Agent: curl/7.68.0\r\n
//! \r\n
//! ```
//!
//! 1. **Request Line**: exactamente 3 tokens separados por un espacio
//! 2. **Headers**: pares `nombre: valor`, nombres en minúsculas, el último gana
//! 3. **Host**: obligatorio en HTTP/1.1
//!
//! El body no se toca aquí: lo lee `server::client` directamente del socket.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Única versión aceptada
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Terminador del head
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Tamaño máximo del head (request line + headers)
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Errores que pueden ocurrir durante el parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// El head no es UTF-8 válido
    #[error("request head is not valid UTF-8")]
    Encoding,

    /// La request line no tiene 3 tokens
    #[error("bad request line: {0}")]
    InvalidRequestLine(String),

    /// Versión distinta de HTTP/1.1
    #[error("not http/1.1: {0}")]
    UnsupportedVersion(String),

    /// Línea de header que no calza con `nombre: valor`
    #[error("could not parse: {0}")]
    InvalidHeader(String),

    /// Falta el header Host
    #[error("host required for http/1.1")]
    MissingHost,

    /// Head sin terminador dentro de `MAX_HEAD_SIZE`
    #[error("request head too large")]
    HeadTooLarge,

    /// Content-Length no numérico
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
}

/// Request head parseado: tokens de la request line y headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Nombres en minúsculas
    pub headers: HashMap<String, String>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Content-Length ya validado (0 si faltaba)
    pub fn content_length(&self) -> Result<u64, ParseError> {
        let raw = self.header("content-length").unwrap_or("0");
        raw.trim()
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))
    }
}

fn header_line() -> &'static Regex {
    static HEADER_LINE: OnceLock<Regex> = OnceLock::new();
    HEADER_LINE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_-]+):\s*(\S.*)$").expect("header pattern is valid")
    })
}

/// Parsea un request head (sin el `\r\n\r\n` final o con él).
///
/// # Ejemplo
///
/// ```
/// use prefork_server::http::request::parse_request_head;
///
/// let head = parse_request_head(b"GET /?q=1 HTTP/1.1\r\nHost: x").unwrap();
/// assert_eq!(head.method, "GET");
/// assert_eq!(head.header("host"), Some("x"));
/// assert_eq!(head.header("content-length"), Some("0"));
/// ```
pub fn parse_request_head(buffer: &[u8]) -> Result<RequestHead, ParseError> {
    let text = std::str::from_utf8(buffer).map_err(|_| ParseError::Encoding)?;
    let mut lines = text.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let tokens: Vec<&str> = request_line.split(' ').collect();
    if tokens.len() != 3 {
        return Err(ParseError::InvalidRequestLine(request_line.to_string()));
    }
    if tokens[2] != HTTP_VERSION {
        return Err(ParseError::UnsupportedVersion(tokens[2].to_string()));
    }

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let captures = header_line()
            .captures(line)
            .ok_or_else(|| ParseError::InvalidHeader(line.to_string()))?;
        headers.insert(captures[1].to_lowercase(), captures[2].to_string());
    }

    headers
        .entry("content-length".to_string())
        .or_insert_with(|| "0".to_string());
    if !headers.contains_key("host") {
        return Err(ParseError::MissingHost);
    }

    let head = RequestHead {
        method: tokens[0].to_string(),
        target: tokens[1].to_string(),
        version: tokens[2].to_string(),
        headers,
    };
    head.content_length()?;
    Ok(head)
}

/// Posición del primer `\r\n\r\n`, si ya llegó
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_get() {
        let head = parse_request_head(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();

        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.header("host"), Some("localhost"));
    }

    #[test]
    fn test_header_names_are_lowercased() {
        let raw =
            b"POST /submit HTTP/1.1\r\nHOST: a\r\nContent-Type: text/plain\r\nX-Custom-Id: 42";
        let head = parse_request_head(raw).unwrap();

        assert_eq!(head.header("content-type"), Some("text/plain"));
        assert_eq!(head.header("x-custom-id"), Some("42"));
        assert_eq!(head.header("Content-Type"), None);
    }

    #[test]
    fn test_duplicate_header_last_wins() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\nAccept: one\r\naccept: two";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.header("accept"), Some("two"));
    }

    #[test]
    fn test_missing_content_length_defaults_to_zero() {
        let head = parse_request_head(b"GET / HTTP/1.1\r\nHost: a").unwrap();
        assert_eq!(head.header("content-length"), Some("0"));
        assert_eq!(head.content_length(), Ok(0));
    }

    #[test]
    fn test_content_length_is_kept() {
        let head = parse_request_head(b"PUT /x HTTP/1.1\r\nHost: a\r\nContent-Length: 12").unwrap();
        assert_eq!(head.content_length(), Ok(12));
    }

    #[test]
    fn test_invalid_content_length() {
        let result = parse_request_head(b"PUT /x HTTP/1.1\r\nHost: a\r\nContent-Length: many");
        assert!(matches!(result, Err(ParseError::InvalidContentLength(_))));
    }

    #[test]
    fn test_header_value_may_follow_colon_directly() {
        let head = parse_request_head(b"GET / HTTP/1.1\r\nHost:example.com").unwrap();
        assert_eq!(head.header("host"), Some("example.com"));
    }

    #[test]
    fn test_missing_host() {
        let result = parse_request_head(b"GET / HTTP/1.1\r\nAccept: */*\r\nContent-Length: 0");
        assert_eq!(result, Err(ParseError::MissingHost));
    }

    #[test]
    fn test_invalid_version() {
        let result = parse_request_head(b"GET / HTTP/1.0\r\nHost: a");
        assert!(matches!(result, Err(ParseError::UnsupportedVersion(_))));

        let result = parse_request_head(b"GET / http/1.1\r\nHost: a");
        assert!(matches!(result, Err(ParseError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_invalid_request_line() {
        let result = parse_request_head(b"GET\r\nHost: a");
        assert!(matches!(result, Err(ParseError::InvalidRequestLine(_))));

        let result = parse_request_head(b"GET / extra HTTP/1.1\r\nHost: a");
        assert!(matches!(result, Err(ParseError::InvalidRequestLine(_))));

        // Dos espacios producen un token vacío
        let result = parse_request_head(b"GET  / HTTP/1.1\r\nHost: a");
        assert!(matches!(result, Err(ParseError::InvalidRequestLine(_))));
    }

    #[test]
    fn test_invalid_header_line() {
        let result = parse_request_head(b"GET / HTTP/1.1\r\nHost: a\r\nnot a header");
        assert_eq!(result, Err(ParseError::InvalidHeader("not a header".to_string())));

        let result = parse_request_head(b"GET / HTTP/1.1\r\nHost: a\r\nEmpty:");
        assert!(matches!(result, Err(ParseError::InvalidHeader(_))));
    }

    #[test]
    fn test_non_ascii_header_name() {
        let result = parse_request_head("GET / HTTP/1.1\r\nHost: a\r\nX-Año: 1".as_bytes());
        assert_eq!(result, Err(ParseError::InvalidHeader("X-Año: 1".to_string())));
    }

    #[test]
    fn test_invalid_utf8() {
        let result = parse_request_head(b"\xff\xfe / HTTP/1.1\r\nHost: a");
        assert_eq!(result, Err(ParseError::Encoding));
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: a\r\n\r\nbody"), Some(23));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
    }
}
