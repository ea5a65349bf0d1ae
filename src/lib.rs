//! # Prefork Server
//! src/lib.rs
//!
//! Servidor HTTP/1.1 pre-fork: un proceso master abre el socket de escucha,
//! hace fork de un pool de workers y los supervisa con heartbeats y
//! señales. Cada worker atiende un request por conexión.
//!
//! ## Arquitectura
//!
//! El servidor está dividido en módulos especializados:
//! - `net`: Sockets POSIX y espera de readiness con `poll(2)`
//! - `http`: Parsing del request head, environment y serialización
//! - `app`: Contrato de aplicación y composición de middleware
//! - `server`: Master, workers, señales y heartbeats
//! - `config`: Configuración por CLI y variables de entorno
//! - `logging`: Niveles de log y subscriber de `tracing`
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use prefork_server::app::{AppError, CommonLogger, Stack};
//! use prefork_server::config::Config;
//! use prefork_server::http::{Environment, Response, StatusCode};
//! use prefork_server::server::{Forker, Master};
//!
//! fn hello(_env: &mut Environment) -> Result<Response, AppError> {
//!     Ok(Response::new(StatusCode::Ok).with_body(b"Hello, world!")?)
//! }
//!
//! let config = Config::default();
//! let mut stack = Stack::new();
//! stack.push(|next| Box::new(CommonLogger::new(next)));
//!
//! let forker = Forker::new(stack.build(hello), config.timeout());
//! Master::new(config, forker).start().expect("server failed");
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod net;
pub mod server;

pub use error::{Result, ServerError};
