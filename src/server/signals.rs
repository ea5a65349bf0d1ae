//! # Señales y Self-Pipe
//! src/server/signals.rs
//!
//! Los handlers de señales del sistema operativo no hacen nada más que:
//!
//! 1. Encolar el número de señal en un `SignalQueue` (ring lock-free)
//! 2. Escribir un byte en el `ControlChannel` para despertar al loop
//!
//! El loop principal (master o worker) consume la cola fuera del contexto
//! del handler, donde sí puede loguear y reservar memoria.

use nix::sys::signal::Signal;
use signal_hook::SigId;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::net::readiness::{self, Interest, Watch};

/// Señales pendientes que caben en la cola; las demás se descartan
pub const QUEUE_CAPACITY: usize = 64;

/// Señales que maneja el master
pub const MASTER_SIGNALS: &[Signal] = &[
    Signal::SIGQUIT,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGWINCH,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

/// Cola FIFO acotada de señales.
///
/// `push` es async-signal-safe (solo atómicos, sin reservar memoria).
/// `pop` asume un único consumidor: el loop principal del proceso.
pub struct SignalQueue {
    slots: [AtomicI32; QUEUE_CAPACITY],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicI32::new(0)),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Encola una señal. Retorna `false` si la cola está llena.
    pub fn push(&self, signal: Signal) -> bool {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if tail.wrapping_sub(head) >= QUEUE_CAPACITY {
                return false;
            }
            if self
                .tail
                .compare_exchange(tail, tail.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.slots[tail % QUEUE_CAPACITY].store(signal as i32, Ordering::Release);
                return true;
            }
        }
    }

    /// Desencola la señal más antigua
    pub fn pop(&self) -> Option<Signal> {
        let head = self.head.load(Ordering::Acquire);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }

        // 0 = el productor reservó el slot pero todavía no escribió
        let raw = self.slots[head % QUEUE_CAPACITY].swap(0, Ordering::AcqRel);
        if raw == 0 {
            return None;
        }
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Signal::try_from(raw).ok()
    }

    pub fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalQueue").field("len", &self.len()).finish()
    }
}

/// Self-pipe: un par de sockets Unix no bloqueantes.
///
/// Solo sirve para despertar una espera de readiness; nunca lleva datos.
#[derive(Debug)]
pub struct ControlChannel {
    reader: Option<UnixStream>,
    writer: UnixStream,
}

impl ControlChannel {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self {
            reader: Some(reader),
            writer,
        })
    }

    /// Descriptor que escriben los handlers de señales
    pub fn wake_fd(&self) -> RawFd {
        self.writer.as_raw_fd()
    }

    /// Descriptor de lectura, si no se cerró
    pub fn reader_fd(&self) -> Option<RawFd> {
        self.reader.as_ref().map(|r| r.as_raw_fd())
    }

    /// Todos los descriptores abiertos (para cerrarlos en un hijo)
    pub fn fds(&self) -> Vec<RawFd> {
        self.reader_fd().into_iter().chain([self.wake_fd()]).collect()
    }

    /// Despierta a quien esté esperando en este canal
    pub fn wake(&self) {
        wake(self.wake_fd());
    }

    /// Espera hasta que alguien despierte el canal o pase el timeout.
    ///
    /// Retorna `true` si hubo un despertar (los bytes se descartan).
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let Some(fd) = self.reader_fd() else {
            std::thread::sleep(timeout);
            return false;
        };

        let mut watch = [Watch::new(fd, Interest::Read)];
        match readiness::wait(&mut watch, Some(timeout), readiness::DEFAULT_RETRYABLE) {
            Ok(_) if watch[0].ready => {
                self.drain();
                true
            }
            Ok(_) => false,
            Err(errno) => {
                tracing::warn!(%errno, "control channel wait failed");
                false
            }
        }
    }

    /// Descarta los bytes pendientes
    pub fn drain(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            return;
        };
        let mut buf = [0u8; 64];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    /// Cierra el extremo de lectura
    pub fn close_reader(&mut self) {
        self.reader = None;
    }

    pub fn is_reader_open(&self) -> bool {
        self.reader.is_some()
    }
}

/// Encola señales desde el mismo proceso, sin pasar por el kernel
#[derive(Debug)]
pub struct Notifier {
    queue: Arc<SignalQueue>,
    writer: UnixStream,
}

impl Notifier {
    pub fn new(queue: Arc<SignalQueue>, channel: &ControlChannel) -> io::Result<Self> {
        Ok(Self {
            queue,
            writer: channel.writer.try_clone()?,
        })
    }

    /// Igual que si el proceso hubiera recibido `signal`
    pub fn notify(&self, signal: Signal) -> bool {
        let queued = self.queue.push(signal);
        if queued {
            wake(self.writer.as_raw_fd());
        }
        queued
    }
}

/// Escribe un byte en `fd`. Apto para usarse dentro de un signal handler.
pub fn wake(fd: RawFd) {
    let byte = [1u8];
    // Si el buffer está lleno ya hay un despertar pendiente
    let _ = unsafe { libc::send(fd, byte.as_ptr().cast(), 1, libc::MSG_NOSIGNAL) };
}

/// Handlers instalados por un proceso
#[derive(Debug, Default)]
pub struct SignalRegistration {
    ids: Vec<SigId>,
}

impl SignalRegistration {
    /// Instala, para cada señal, un handler que la encola y escribe en
    /// `wake_fd`. El descriptor debe seguir abierto mientras los handlers
    /// estén registrados.
    pub fn install(
        signals: &[Signal],
        queue: Arc<SignalQueue>,
        wake_fd: RawFd,
    ) -> io::Result<Self> {
        let mut registration = Self::default();
        for &signal in signals {
            let queue = Arc::clone(&queue);
            registration.add(signal, move || {
                if queue.push(signal) {
                    wake(wake_fd);
                }
            })?;
        }
        Ok(registration)
    }

    /// Registra un handler arbitrario.
    ///
    /// `action` corre en contexto de signal handler: solo puede usar
    /// operaciones async-signal-safe.
    pub fn add<F>(&mut self, signal: Signal, action: F) -> io::Result<()>
    where
        F: Fn() + Sync + Send + 'static,
    {
        let id = unsafe { signal_hook::low_level::register(signal as i32, action)? };
        self.ids.push(id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Quita todos los handlers (idempotente)
    pub fn unregister_all(&self) {
        for id in &self.ids {
            signal_hook::low_level::unregister(*id);
        }
    }
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_is_fifo() {
        let queue = SignalQueue::new();
        assert!(queue.is_empty());
        assert!(queue.push(Signal::SIGTTIN));
        assert!(queue.push(Signal::SIGQUIT));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(Signal::SIGTTIN));
        assert_eq!(queue.pop(), Some(Signal::SIGQUIT));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_drops_when_full() {
        let queue = SignalQueue::new();
        for _ in 0..QUEUE_CAPACITY {
            assert!(queue.push(Signal::SIGTTIN));
        }
        assert!(!queue.push(Signal::SIGTTOU));
        assert_eq!(queue.len(), QUEUE_CAPACITY);

        // Al liberar un lugar vuelve a aceptar
        assert_eq!(queue.pop(), Some(Signal::SIGTTIN));
        assert!(queue.push(Signal::SIGTTOU));
    }

    #[test]
    fn test_queue_wraps_around() {
        let queue = SignalQueue::new();
        for _ in 0..(QUEUE_CAPACITY * 3) {
            assert!(queue.push(Signal::SIGHUP));
            assert_eq!(queue.pop(), Some(Signal::SIGHUP));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let mut channel = ControlChannel::new().unwrap();
        assert!(!channel.wait(Duration::from_millis(10)));

        channel.wake();
        channel.wake();
        assert!(channel.wait(Duration::from_secs(1)));
        // Los dos bytes se drenaron juntos
        assert!(!channel.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_closed_reader() {
        let mut channel = ControlChannel::new().unwrap();
        assert_eq!(channel.fds().len(), 2);

        channel.close_reader();
        assert!(!channel.is_reader_open());
        assert_eq!(channel.fds(), vec![channel.wake_fd()]);
        assert!(!channel.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_notifier_queues_and_wakes() {
        let queue = Arc::new(SignalQueue::new());
        let mut channel = ControlChannel::new().unwrap();
        let notifier = Notifier::new(Arc::clone(&queue), &channel).unwrap();

        assert!(notifier.notify(Signal::SIGTTOU));
        assert!(channel.wait(Duration::from_secs(1)));
        assert_eq!(queue.pop(), Some(Signal::SIGTTOU));
    }

    #[test]
    fn test_raised_signal_is_queued() {
        let queue = Arc::new(SignalQueue::new());
        let mut channel = ControlChannel::new().unwrap();
        let registration =
            SignalRegistration::install(&[Signal::SIGWINCH], Arc::clone(&queue), channel.wake_fd())
                .unwrap();
        assert_eq!(registration.len(), 1);

        nix::sys::signal::raise(Signal::SIGWINCH).unwrap();

        assert!(channel.wait(Duration::from_secs(1)));
        assert_eq!(queue.pop(), Some(Signal::SIGWINCH));
        registration.unregister_all();
    }
}
