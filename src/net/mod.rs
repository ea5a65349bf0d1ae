//! # Módulo de Red
//!
//! Sockets POSIX y espera de readiness. El servidor no usa
//! `std::net::TcpListener` porque el descriptor de escucha se hereda por
//! fork y cada proceso lo cierra explícitamente.

pub mod readiness; // poll(2) con errnos reintentables
pub mod socket;    // Listener y Connection

pub use readiness::{Interest, Watch};
pub use socket::{Connection, Listener};
