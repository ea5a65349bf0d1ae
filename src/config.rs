//! # Configuración del Servidor
//! src/config.rs
//!
//! Configuración del servidor pre-fork con soporte para argumentos CLI y
//! variables de entorno. Es inmutable una vez que arranca el master: el
//! número de workers que cambia con SIGTTIN/SIGTTOU vive en el master.
//!
//! ## Ejemplos de uso
//!
//! ### CLI
//! ```bash
//! ./prefork_server --port 8080 --workers 4 --timeout 30 --log-level debug
//! ```
//!
//! ### Variables de entorno
//! ```bash
//! HTTP_PORT=8080 HTTP_HOST=127.0.0.1 WORKERS=4 ./prefork_server
//! ```

use crate::logging::LogLevel;
use clap::Parser;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Configuración del servidor HTTP/1.1 pre-fork
#[derive(Debug, Clone, Parser)]
#[command(name = "prefork_server")]
#[command(about = "Servidor HTTP/1.1 pre-fork con supervisión de workers")]
#[command(version = "0.1.0")]
pub struct Config {
    /// Interfaz/IP en la que escucha
    #[arg(long, default_value = "0.0.0.0", env = "HTTP_HOST")]
    pub host: String,

    /// Puerto en el que escucha el servidor
    #[arg(short, long, default_value = "5000", env = "HTTP_PORT")]
    pub port: u16,

    /// Número deseado de procesos worker
    #[arg(short, long, default_value = "1", env = "WORKERS")]
    pub workers: usize,

    /// Segundos sin heartbeat antes de matar a un worker colgado.
    /// También acota el drenado al apagar.
    #[arg(short, long, default_value = "30", env = "WORKER_TIMEOUT")]
    pub timeout: u64,

    /// Nivel mínimo de log
    #[arg(long = "log-level", value_enum, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: LogLevel,
}

impl Config {
    /// Crea una nueva configuración parseando argumentos CLI
    pub fn new() -> Self {
        Config::parse().normalized()
    }

    /// Obtiene la dirección completa para bind (host:port)
    ///
    /// # Ejemplo
    /// ```rust
    /// use prefork_server::config::Config;
    ///
    /// let config = Config::default();
    /// assert_eq!(config.address(), "0.0.0.0:5000");
    /// ```
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Timeout de heartbeat como `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Resuelve el host a una dirección IPv4 (`localhost` incluido)
    pub fn interface(&self) -> Option<Ipv4Addr> {
        if self.host == "localhost" {
            return Some(Ipv4Addr::LOCALHOST);
        }
        self.host.parse().ok()
    }

    /// Aplica el invariante `workers >= 1`
    pub fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self
    }

    /// Valida la configuración
    ///
    /// Retorna errores si hay valores inválidos
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout == 0 {
            return Err("Timeout must be > 0".to_string());
        }

        if self.interface().is_none() {
            return Err(format!("Host must be an IPv4 address: {}", self.host));
        }

        Ok(())
    }

    /// Registra un resumen de la configuración
    pub fn log_summary(&self) {
        tracing::info!(
            address = %self.address(),
            workers = self.workers,
            timeout_secs = self.timeout,
            log_level = ?self.log_level,
            "Configuration loaded"
        );
    }
}

impl Default for Config {
    /// Configuración por defecto
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            workers: 1,
            timeout: 30,
            log_level: LogLevel::Info,
        }
    }
}
