//! # Módulo del Servidor
//! src/server/mod.rs
//!
//! Modelo pre-fork: un master supervisa N procesos worker que comparten el
//! socket de escucha.
//!
//! ```text
//!            ┌────────── master ──────────┐
//!            │ señales · heartbeats · fork │
//!            └──┬──────────┬──────────┬───┘
//!           worker 0   worker 1   worker N-1
//!               └──── accept() compartido ───┘
//! ```

pub mod client;    // Un request/response por conexión
pub mod heartbeat; // Marca de vida compartida
pub mod master;    // Supervisión y reconciliación
pub mod signals;   // Cola de señales y self-pipe
pub mod worker;    // Loop de accept

// Re-exportar para facilitar el uso
pub use heartbeat::Heartbeat;
pub use master::{Forker, Master, ProcessControl, State, WorkerRecord, WorkerSeed, WorkerTable};
pub use signals::{ControlChannel, Notifier, SignalQueue, SignalRegistration};
pub use worker::Worker;
