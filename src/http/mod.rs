//! # Módulo HTTP
//!
//! Implementa el subconjunto de HTTP/1.1 que necesita el servidor, sin
//! librerías de alto nivel:
//!
//! - Parsing del request head (request line + headers)
//! - Construcción del environment que recibe la aplicación
//! - Serialización del status line y headers de la respuesta
//! - Tabla de status codes
//!
//! Fuera de alcance: keep-alive, chunked transfer-encoding, HTTP/2, TLS.
//! Toda conexión se cierra después de una respuesta.

pub mod body;      // Stream bufferizado para bodies
pub mod environ;   // Environment del request
pub mod request;   // Parsing del request head
pub mod response;  // Respuestas y serialización
pub mod status;    // Códigos de estado HTTP

// Re-exportamos los tipos principales para facilitar su uso
pub use body::Body;
pub use environ::{build_environment, Environment};
pub use request::{parse_request_head, ParseError, RequestHead};
pub use response::{serialize_response, Response};
pub use status::StatusCode;
