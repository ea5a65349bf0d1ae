//! # Worker
//! src/server/worker.rs
//!
//! Proceso hijo que acepta conexiones del socket compartido y atiende un
//! request por conexión. El kernel decide qué worker gana cada `accept`.
//!
//! ## Señales
//!
//! | Señal   | Efecto                                        |
//! |---------|-----------------------------------------------|
//! | SIGTERM | sale de inmediato                             |
//! | SIGINT  | ignorada (solo el master la atiende)          |
//! | SIGQUIT | deja de aceptar y termina el loop             |
//! | SIGUSR1 | cierra el extremo de lectura del self-pipe    |

use crate::app::Application;
use crate::error::{Result, ServerError};
use crate::net::readiness::{self, Interest, Watch};
use crate::net::socket::Listener;
use crate::server::client::process_client;
use crate::server::heartbeat::Heartbeat;
use crate::server::signals::{ControlChannel, Notifier, SignalQueue, SignalRegistration};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Loop de un worker
pub struct Worker<'a> {
    slot: usize,
    listener: Option<Listener>,
    heartbeat: &'a Heartbeat,
    control: ControlChannel,
    queue: Arc<SignalQueue>,
    signals: SignalRegistration,
    alive: bool,
    app: &'a dyn Application,
    timeout: Duration,
}

impl<'a> Worker<'a> {
    /// Prepara el worker: self-pipe propio, heartbeat fresco y socket de
    /// escucha no bloqueante
    pub fn new(
        slot: usize,
        listener: Listener,
        heartbeat: &'a Heartbeat,
        app: &'a dyn Application,
        timeout: Duration,
    ) -> Result<Self> {
        let control = ControlChannel::new()?;
        listener.set_nonblocking()?;
        heartbeat.touch();

        Ok(Self {
            slot,
            listener: Some(listener),
            heartbeat,
            control,
            queue: Arc::new(SignalQueue::new()),
            signals: SignalRegistration::default(),
            alive: true,
            app,
            timeout,
        })
    }

    /// Instala los handlers del worker. Solo tiene sentido en el proceso
    /// hijo: SIGTERM termina el proceso entero.
    pub fn install_signals(&mut self) -> io::Result<()> {
        let mut signals = SignalRegistration::install(
            &[Signal::SIGQUIT, Signal::SIGUSR1],
            Arc::clone(&self.queue),
            self.control.wake_fd(),
        )?;
        signals.add(Signal::SIGTERM, || signal_hook::low_level::exit(0))?;
        signals.add(Signal::SIGINT, || {})?;
        self.signals = signals;
        Ok(())
    }

    /// Permite encolar señales al worker desde otro thread
    pub fn notifier(&self) -> io::Result<Notifier> {
        Notifier::new(Arc::clone(&self.queue), &self.control)
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Corre el loop hasta recibir SIGQUIT
    pub fn run(mut self) {
        let span = tracing::info_span!("worker", slot = self.slot, pid = std::process::id());
        let _enter = span.enter();

        tracing::info!("Booting worker");
        while self.step() {}
        tracing::info!("Worker exiting");

        self.signals.unregister_all();
    }

    /// Una vuelta del loop. Retorna `false` cuando el worker debe terminar.
    pub fn step(&mut self) -> bool {
        self.dispatch_signals();
        if !self.alive {
            return false;
        }
        self.heartbeat.touch();

        let Some(listener) = self.listener.as_ref() else {
            return false;
        };

        let mut watches = vec![Watch::new(listener.fd(), Interest::Read)];
        if let Some(fd) = self.control.reader_fd() {
            watches.push(Watch::new(fd, Interest::Read));
        }

        // La mitad del timeout para que el heartbeat nunca llegue a vencer
        // estando ocioso
        match readiness::wait(&mut watches, Some(self.timeout / 2), readiness::DEFAULT_RETRYABLE) {
            Ok(0) => return true,
            Ok(_) => {}
            Err(errno) => {
                tracing::warn!(%errno, "Readiness wait failed");
                return true;
            }
        }

        if watches.get(1).is_some_and(|w| w.ready) {
            self.control.drain();
        }
        if !watches[0].ready {
            return true;
        }

        match listener.accept() {
            Ok(conn) => {
                process_client(conn, self.app, self.timeout);
                self.heartbeat.touch();
            }
            // Otro worker ganó el accept
            Err(ServerError::Socket(Errno::EAGAIN | Errno::ECONNABORTED | Errno::EINTR)) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to accept connection"),
        }
        true
    }

    fn dispatch_signals(&mut self) {
        while let Some(signal) = self.queue.pop() {
            match signal {
                Signal::SIGQUIT => {
                    tracing::info!("Received SIGQUIT, stopping");
                    self.alive = false;
                    if let Some(listener) = self.listener.take() {
                        if let Err(e) = listener.close() {
                            tracing::warn!(error = %e, "Failed to close listener");
                        }
                    }
                }
                Signal::SIGUSR1 => {
                    tracing::debug!("Received SIGUSR1, closing control channel");
                    self.control.close_reader();
                }
                other => tracing::debug!(signal = %other, "Ignoring signal"),
            }
        }
    }
}
