//! # Master
//! src/server/master.rs
//!
//! Proceso supervisor. Abre el socket de escucha, hace fork de los workers
//! y los mantiene vivos:
//!
//! ```text
//! Idle → Listening → Running → Draining → Stopped
//! ```
//!
//! En cada vuelta del loop principal:
//! 1. Recolecta los workers que terminaron
//! 2. Toma una señal de la cola (o revisa heartbeats si no hay ninguna)
//! 3. Reconcilia los workers vivos con la cantidad deseada
//! 4. Duerme ~1s (una señal lo despierta antes)
//!
//! El fork vive detrás de `ProcessControl` para poder probar la supervisión
//! sin crear procesos.

use crate::app::Application;
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::net::socket::Listener;
use crate::server::heartbeat::{now_millis, Heartbeat};
use crate::server::signals::{
    ControlChannel, Notifier, SignalQueue, SignalRegistration, MASTER_SIGNALS,
};
use crate::server::worker::Worker;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, fork, ForkResult, Pid};
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Pausa entre reconciliaciones
const RECONCILE_PAUSE: Duration = Duration::from_secs(1);

/// Pausa entre rondas de señales al apagar
const DRAIN_PAUSE: Duration = Duration::from_millis(100);

/// Estado del master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Listening,
    Running,
    Draining,
    Stopped,
}

/// Un worker vivo, visto desde el master
#[derive(Debug)]
pub struct WorkerRecord {
    pub pid: Pid,
    pub slot: usize,
    pub heartbeat: Heartbeat,
}

/// Workers en orden de registro
#[derive(Debug, Default)]
pub struct WorkerTable {
    records: Vec<WorkerRecord>,
}

impl WorkerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: WorkerRecord) {
        self.records.push(record);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<WorkerRecord> {
        let index = self.records.iter().position(|r| r.pid == pid)?;
        Some(self.records.remove(index))
    }

    pub fn get(&self, pid: Pid) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| r.pid == pid)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.records.iter()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.records.iter().map(|r| r.pid).collect()
    }

    /// Slots ocupados, ordenados
    pub fn slots(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = self.records.iter().map(|r| r.slot).collect();
        slots.sort_unstable();
        slots
    }

    /// Slots en `0..desired` sin worker
    pub fn missing_slots(&self, desired: usize) -> Vec<usize> {
        (0..desired)
            .filter(|slot| !self.records.iter().any(|r| r.slot == *slot))
            .collect()
    }

    /// Workers que sobran: primero los de slot fuera de rango, después los
    /// más antiguos
    pub fn excess(&self, desired: usize) -> Vec<Pid> {
        let count = self.records.len().saturating_sub(desired);
        let out_of_range = self.records.iter().filter(|r| r.slot >= desired);
        let in_range = self.records.iter().filter(|r| r.slot < desired);
        out_of_range.chain(in_range).take(count).map(|r| r.pid).collect()
    }

    /// Workers cuyo heartbeat venció
    pub fn lazy(&self, now_ms: u64, timeout: Duration) -> Vec<Pid> {
        self.records
            .iter()
            .filter(|r| r.heartbeat.is_stale(now_ms, timeout))
            .map(|r| r.pid)
            .collect()
    }
}

/// Lo que necesita un worker nuevo
pub struct WorkerSeed<'a> {
    pub slot: usize,
    pub heartbeat: &'a Heartbeat,
    pub listener: &'a Listener,
    /// Descriptores del master que el hijo debe cerrar
    pub inherited: &'a [RawFd],
    /// Handlers del master que el hijo debe quitar
    pub master_signals: &'a SignalRegistration,
}

/// Creación, señalización y recolección de procesos
pub trait ProcessControl {
    fn spawn(&mut self, seed: WorkerSeed<'_>) -> Result<Pid>;

    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<()>;

    /// Recolecta sin bloquear todos los hijos que terminaron
    fn reap(&mut self) -> Vec<Pid>;
}

/// `ProcessControl` real: fork + kill + waitpid
pub struct Forker {
    app: Box<dyn Application>,
    timeout: Duration,
    /// Hijos creados y todavía no recolectados
    children: Vec<Pid>,
}

impl Forker {
    pub fn new(app: Box<dyn Application>, timeout: Duration) -> Self {
        Self {
            app,
            timeout,
            children: Vec::new(),
        }
    }
}

impl ProcessControl for Forker {
    fn spawn(&mut self, seed: WorkerSeed<'_>) -> Result<Pid> {
        match unsafe { fork() }.map_err(ServerError::Process)? {
            ForkResult::Parent { child } => {
                self.children.push(child);
                Ok(child)
            }
            ForkResult::Child => {
                let code = run_child(seed, self.app.as_ref(), self.timeout);
                std::process::exit(code);
            }
        }
    }

    fn signal(&mut self, pid: Pid, signal: Signal) -> Result<()> {
        signal::kill(pid, signal).map_err(ServerError::Process)
    }

    /// Solo espera por hijos propios
    fn reap(&mut self) -> Vec<Pid> {
        let mut reaped = Vec::new();
        self.children.retain(|&pid| {
            let done = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    tracing::debug!(%pid, code, "Reaped worker");
                    true
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    tracing::debug!(%pid, %signal, "Reaped worker killed by signal");
                    true
                }
                Ok(_) | Err(Errno::EINTR) => false,
                // Ya lo recolectó otro
                Err(Errno::ECHILD) => true,
                Err(errno) => {
                    tracing::warn!(%pid, %errno, "waitpid failed");
                    false
                }
            };
            if done {
                reaped.push(pid);
            }
            !done
        });
        reaped
    }
}

/// Cuerpo del proceso hijo. Retorna el exit code.
fn run_child(seed: WorkerSeed<'_>, app: &dyn Application, timeout: Duration) -> i32 {
    seed.master_signals.unregister_all();

    let listener = match seed.listener.duplicate() {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "Failed to duplicate listener");
            return 1;
        }
    };
    let fallback = seed.inherited.iter().copied().chain([seed.listener.fd()]);
    close_inherited_fds(listener.fd(), fallback);

    let mut worker = match Worker::new(seed.slot, listener, seed.heartbeat, app, timeout) {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(error = %e, slot = seed.slot, "Failed to start worker");
            return 1;
        }
    };
    if let Err(e) = worker.install_signals() {
        tracing::error!(error = %e, "Failed to install worker signal handlers");
        return 1;
    }

    worker.run();
    0
}

/// Cierra en el hijo todo descriptor heredado salvo stdio y `keep`.
///
/// Sin `/proc` se cierran solo los de `fallback`.
fn close_inherited_fds(keep: RawFd, fallback: impl IntoIterator<Item = RawFd>) {
    let fds: Vec<RawFd> = match std::fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .filter(|&fd| fd > 2 && fd != keep)
            .collect(),
        Err(_) => fallback.into_iter().filter(|&fd| fd != keep).collect(),
    };
    for fd in fds {
        let _ = unistd::close(fd);
    }
}

/// Supervisor de workers
pub struct Master<P: ProcessControl> {
    config: Config,
    desired: usize,
    state: State,
    listener: Option<Listener>,
    control: Option<ControlChannel>,
    queue: Arc<SignalQueue>,
    signals: SignalRegistration,
    workers: WorkerTable,
    process: P,
    done: bool,
    graceful: bool,
    last_lazy_check: Instant,
}

impl<P: ProcessControl> Master<P> {
    pub fn new(config: Config, process: P) -> Self {
        let config = config.normalized();
        Self {
            desired: config.workers,
            config,
            state: State::Idle,
            listener: None,
            control: None,
            queue: Arc::new(SignalQueue::new()),
            signals: SignalRegistration::default(),
            workers: WorkerTable::new(),
            process,
            done: false,
            graceful: true,
            last_lazy_check: Instant::now(),
        }
    }

    /// Abre el socket de escucha y el self-pipe (Idle → Listening)
    pub fn bind(&mut self) -> Result<()> {
        let iface = self
            .config
            .interface()
            .ok_or_else(|| ServerError::Config(format!("invalid host: {}", self.config.host)))?;

        let listener = Listener::bind_and_listen(iface, self.config.port)?;
        tracing::info!(address = %listener.address(), "Listening");

        self.listener = Some(listener);
        self.control = Some(ControlChannel::new()?);
        self.state = State::Listening;
        Ok(())
    }

    /// `bind` más los handlers de señales del master
    pub fn listen(&mut self) -> Result<()> {
        self.bind()?;
        if let Some(control) = self.control.as_ref() {
            let queue = Arc::clone(&self.queue);
            self.signals = SignalRegistration::install(MASTER_SIGNALS, queue, control.wake_fd())?;
        }
        Ok(())
    }

    /// Escucha, corre el loop principal y apaga
    pub fn start(&mut self) -> Result<()> {
        self.listen()?;
        self.run()
    }

    /// Loop principal (Listening → Running → ... → Stopped)
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            return Err(ServerError::Config("master is not listening".to_string()));
        }

        self.state = State::Running;
        tracing::info!(workers = self.desired, pid = std::process::id(), "Starting master");
        self.maintain_worker_count();

        while self.step() {}

        self.stop(self.graceful);
        Ok(())
    }

    /// Una vuelta del loop. Retorna `false` cuando hay que apagar.
    pub fn step(&mut self) -> bool {
        self.reap_workers();

        match self.queue.pop() {
            None => {
                if self.last_lazy_check.elapsed() >= self.config.timeout() {
                    self.murder_lazy_workers(now_millis());
                    self.last_lazy_check = Instant::now();
                } else {
                    self.sleep(self.config.timeout() / 2);
                }
            }
            Some(signal) => {
                self.apply_signal(signal);
            }
        }

        self.maintain_worker_count();
        if self.done {
            return false;
        }
        self.sleep(RECONCILE_PAUSE);
        true
    }

    /// Aplica una señal. Retorna `false` si pide apagar.
    pub fn apply_signal(&mut self, signal: Signal) -> bool {
        match signal {
            Signal::SIGTTIN => {
                self.desired += 1;
                tracing::info!(workers = self.desired, "Increasing worker count");
            }
            Signal::SIGTTOU => {
                self.desired = self.desired.saturating_sub(1).max(1);
                tracing::info!(workers = self.desired, "Decreasing worker count");
            }
            Signal::SIGQUIT | Signal::SIGINT => {
                tracing::info!(%signal, "Graceful shutdown requested");
                self.done = true;
            }
            Signal::SIGTERM => {
                tracing::info!(%signal, "Shutdown requested");
                self.done = true;
                self.graceful = false;
            }
            other => tracing::debug!(signal = %other, "Ignoring signal"),
        }
        !self.done
    }

    /// Mata los workers sobrantes y crea los que faltan
    pub fn maintain_worker_count(&mut self) {
        for pid in self.workers.excess(self.desired) {
            tracing::info!(%pid, "Stopping excess worker");
            self.kill_worker(pid, Signal::SIGQUIT);
        }

        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let inherited = self.control.as_ref().map(|c| c.fds()).unwrap_or_default();

        for slot in self.workers.missing_slots(self.desired) {
            let heartbeat = match Heartbeat::new() {
                Ok(heartbeat) => heartbeat,
                Err(e) => {
                    tracing::error!(error = %e, slot, "Failed to create worker heartbeat");
                    break;
                }
            };

            let seed = WorkerSeed {
                slot,
                heartbeat: &heartbeat,
                listener,
                inherited: &inherited,
                master_signals: &self.signals,
            };
            match self.process.spawn(seed) {
                Ok(pid) => {
                    tracing::info!(%pid, slot, "Booted worker");
                    self.workers.insert(WorkerRecord { pid, slot, heartbeat });
                }
                Err(e) => {
                    // Se reintenta en la próxima reconciliación
                    tracing::error!(error = %e, slot, "Failed to spawn worker");
                    break;
                }
            }
        }
    }

    /// SIGKILL a los workers con heartbeat vencido. Retorna sus pids.
    pub fn murder_lazy_workers(&mut self, now_ms: u64) -> Vec<Pid> {
        let lazy = self.workers.lazy(now_ms, self.config.timeout());
        for &pid in &lazy {
            crate::critical!(%pid, "Worker timeout, killing");
            self.kill_worker(pid, Signal::SIGKILL);
        }
        lazy
    }

    /// Saca de la tabla los workers que terminaron
    pub fn reap_workers(&mut self) -> Vec<Pid> {
        let reaped = self.process.reap();
        for &pid in &reaped {
            if let Some(record) = self.workers.remove(pid) {
                tracing::info!(%pid, slot = record.slot, "Worker exited");
            }
        }
        reaped
    }

    fn kill_worker(&mut self, pid: Pid, signal: Signal) {
        match self.process.signal(pid, signal) {
            Ok(()) => {}
            Err(ServerError::Process(Errno::ESRCH)) => {
                // Ya no existe
                self.workers.remove(pid);
            }
            Err(e) => tracing::warn!(%pid, error = %e, "Failed to signal worker"),
        }
    }

    /// Apaga: señala y recolecta workers hasta vaciar la tabla o agotar el
    /// timeout, después SIGKILL a los que queden y cierra el listener
    pub fn stop(&mut self, graceful: bool) {
        self.state = State::Draining;
        let signal = if graceful { Signal::SIGQUIT } else { Signal::SIGTERM };
        tracing::info!(graceful, "Shutting down");

        let deadline = Instant::now() + self.config.timeout();
        while !self.workers.is_empty() && Instant::now() < deadline {
            for pid in self.workers.pids() {
                self.kill_worker(pid, signal);
            }
            thread::sleep(DRAIN_PAUSE);
            self.reap_workers();
        }

        if !self.workers.is_empty() {
            for pid in self.workers.pids() {
                self.kill_worker(pid, Signal::SIGKILL);
            }
            thread::sleep(DRAIN_PAUSE);
            self.reap_workers();
            if !self.workers.is_empty() {
                tracing::warn!(left = self.workers.len(), "Some workers were not reaped");
            }
        }

        self.signals.unregister_all();
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.shutdown_and_close() {
                tracing::warn!(error = %e, "Failed to close listener");
            }
        }
        self.control = None;
        self.state = State::Stopped;
        tracing::info!("Master stopped");
    }

    /// Encola señales al master sin pasar por el kernel
    pub fn notifier(&self) -> Result<Notifier> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| ServerError::Config("master is not listening".to_string()))?;
        Ok(Notifier::new(Arc::clone(&self.queue), control)?)
    }

    fn sleep(&mut self, duration: Duration) {
        match self.control.as_mut() {
            Some(control) => {
                control.wait(duration);
            }
            None => thread::sleep(duration),
        }
    }

    pub fn workers(&self) -> &WorkerTable {
        &self.workers
    }

    pub fn desired_workers(&self) -> usize {
        self.desired
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.listener.as_ref().map(|l| l.address())
    }
}
