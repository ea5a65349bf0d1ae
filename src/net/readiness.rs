//! # Espera de Readiness
//! src/net/readiness.rs
//!
//! Envoltorio sobre `poll(2)` para saber si un socket se puede leer,
//! escribir o aceptar sin bloquear. Nunca bloquea más allá del timeout.

use nix::errno::Errno;
use std::os::fd::RawFd;
use std::time::Duration;

/// Errnos que se tratan como "todavía no está listo"
pub const DEFAULT_RETRYABLE: &[Errno] = &[Errno::EAGAIN, Errno::EINTR];

/// Qué eventos interesan de un descriptor. Error y hangup se reportan
/// siempre, sea cual sea el interés.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl Interest {
    fn events(&self) -> libc::c_short {
        match self {
            Interest::Read => libc::POLLIN,
            Interest::Write => libc::POLLOUT,
        }
    }
}

/// Un descriptor a observar y, tras la espera, si quedó listo
#[derive(Debug, Clone, Copy)]
pub struct Watch {
    pub fd: RawFd,
    pub interest: Interest,
    pub ready: bool,
}

impl Watch {
    pub fn new(fd: RawFd, interest: Interest) -> Self {
        Self {
            fd,
            interest,
            ready: false,
        }
    }
}

/// Espera hasta que alguno de los descriptores esté listo.
///
/// `None` como timeout bloquea indefinidamente. Retorna cuántos quedaron
/// listos; los errnos de `retryable` se convierten en `Ok(0)` para que el
/// llamador simplemente vuelva a intentar.
pub fn wait(
    watches: &mut [Watch],
    timeout: Option<Duration>,
    retryable: &[Errno],
) -> Result<usize, Errno> {
    let mut fds: Vec<libc::pollfd> = watches
        .iter()
        .map(|w| libc::pollfd {
            fd: w.fd,
            events: w.interest.events(),
            revents: 0,
        })
        .collect();

    let timeout_ms = match timeout {
        Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        None => -1,
    };

    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    let ready = match Errno::result(ret) {
        Ok(n) => n as usize,
        Err(errno) if retryable.contains(&errno) => {
            tracing::debug!(%errno, "readiness wait interrupted, treating as not ready");
            0
        }
        Err(errno) => return Err(errno),
    };

    for (watch, pollfd) in watches.iter_mut().zip(&fds) {
        let wanted = watch.interest.events() | libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;
        watch.ready = ready > 0 && pollfd.revents & wanted != 0;
    }

    Ok(ready)
}

/// Atajo para un único descriptor con la política por defecto
pub fn is_ready(fd: RawFd, interest: Interest, timeout: Option<Duration>) -> Result<bool, Errno> {
    let mut watch = [Watch::new(fd, interest)];
    wait(&mut watch, timeout, DEFAULT_RETRYABLE)?;
    Ok(watch[0].ready)
}
