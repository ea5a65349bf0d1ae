//! # Logging
//! src/logging.rs
//!
//! Sink de logs con cinco niveles (debug, info, warning, error, critical).
//! Cada línea lleva nivel, target (nombre del logger), mensaje y el call
//! site `archivo:línea`. Los eventos por debajo del umbral no hacen nada.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Niveles de severidad aceptados por `--log-level`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    /// Se emite como `ERROR` con el campo `critical = true`
    Critical,
}

impl LogLevel {
    /// Filtro de `tracing` equivalente
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

/// Instala el subscriber global.
///
/// `RUST_LOG`, si está definida, tiene prioridad sobre `level`. Llamarla dos
/// veces no es un error: la segunda instalación se ignora.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.as_filter().into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Evento de severidad crítica
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        ::tracing::error!(critical = true, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }

    #[test]
    fn test_level_filters() {
        assert_eq!(LogLevel::Debug.as_filter(), LevelFilter::DEBUG);
        assert_eq!(LogLevel::Warning.as_filter(), LevelFilter::WARN);
        assert_eq!(LogLevel::Critical.as_filter(), LevelFilter::ERROR);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogLevel::Debug);
        init(LogLevel::Error);
        crate::critical!("still alive");
    }
}
