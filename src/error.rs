//! # Errores del Servidor
//! src/error.rs

use crate::app::AppError;
use crate::http::request::ParseError;
use nix::errno::Errno;
use thiserror::Error;

/// Errores que pueden ocurrir en sockets, parsing y supervisión
#[derive(Debug, Error)]
pub enum ServerError {
    /// Falla de una syscall de socket (lleva el errno)
    #[error("socket error: {0}")]
    Socket(#[from] Errno),

    /// El peer cerró la conexión (lectura de cero bytes)
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// El peer no estuvo listo dentro del timeout configurado
    #[error("timed out waiting for peer")]
    Timeout,

    /// Request head malformado o sin un header obligatorio
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Falla de fork/kill/waitpid
    #[error("process control error: {0}")]
    Process(Errno),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// La aplicación no pudo producir una respuesta
    #[error("application error: {0}")]
    Application(AppError),
}

impl ServerError {
    /// `true` para `Socket` y su especialización `ConnectionClosed`
    pub fn is_socket(&self) -> bool {
        matches!(self, ServerError::Socket(_) | ServerError::ConnectionClosed)
    }

    /// Errno asociado, si lo hay
    pub fn errno(&self) -> Option<Errno> {
        match self {
            ServerError::Socket(errno) | ServerError::Process(errno) => Some(*errno),
            ServerError::Io(e) => e.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_closed_is_socket_error() {
        assert!(ServerError::ConnectionClosed.is_socket());
        assert!(ServerError::Socket(Errno::EBADF).is_socket());
        assert!(!ServerError::Timeout.is_socket());
    }

    #[test]
    fn test_errno() {
        assert_eq!(ServerError::Socket(Errno::EINTR).errno(), Some(Errno::EINTR));
        let io = std::io::Error::from_raw_os_error(libc::EPIPE);
        assert_eq!(ServerError::Io(io).errno(), Some(Errno::EPIPE));
        assert_eq!(ServerError::Process(Errno::EAGAIN).errno(), Some(Errno::EAGAIN));
        assert_eq!(ServerError::ConnectionClosed.errno(), None);
    }

    #[test]
    fn test_display() {
        let err = ServerError::Socket(Errno::ECONNRESET);
        assert!(err.to_string().starts_with("socket error"));
        assert_eq!(
            ServerError::ConnectionClosed.to_string(),
            "connection closed by peer"
        );
    }
}
