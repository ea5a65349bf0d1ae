//! # Heartbeat de Workers
//! src/server/heartbeat.rs
//!
//! Cada worker tiene un timestamp (milisegundos de `CLOCK_MONOTONIC`) en una
//! página anónima compartida que el master crea antes del fork. El worker lo
//! actualiza en cada vuelta de su loop y el master lo lee sin sincronizar:
//! una lectura vieja solo retrasa la detección de un worker colgado.

use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Milisegundos del reloj monótono. El mismo reloj para todos los procesos
/// del host, e inmune a ajustes de la hora del sistema.
pub fn now_millis() -> u64 {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
        return 0;
    }
    ts.tv_sec as u64 * 1_000 + ts.tv_nsec as u64 / 1_000_000
}

/// Marca de vida compartida entre master y worker
#[derive(Debug)]
pub struct Heartbeat {
    ptr: NonNull<AtomicU64>,
}

// La memoria es un AtomicU64 en un mapping propio
unsafe impl Send for Heartbeat {}
unsafe impl Sync for Heartbeat {}

impl Heartbeat {
    /// Reserva la página compartida y la marca con la hora actual
    pub fn new() -> io::Result<Self> {
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                std::mem::size_of::<AtomicU64>(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(addr.cast::<AtomicU64>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        unsafe { ptr.as_ptr().write(AtomicU64::new(now_millis())) };
        Ok(Self { ptr })
    }

    fn cell(&self) -> &AtomicU64 {
        unsafe { self.ptr.as_ref() }
    }

    /// Registra que el worker sigue vivo
    pub fn touch(&self) {
        self.stamp(now_millis());
    }

    pub fn stamp(&self, millis: u64) {
        self.cell().store(millis, Ordering::Relaxed);
    }

    pub fn last_touched(&self) -> u64 {
        self.cell().load(Ordering::Relaxed)
    }

    /// Tiempo desde el último `touch`
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_touched()))
    }

    /// `true` si no se tocó dentro de `timeout`
    pub fn is_stale(&self, now_ms: u64, timeout: Duration) -> bool {
        self.age(now_ms) > timeout
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), std::mem::size_of::<AtomicU64>());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_fresh() {
        let heartbeat = Heartbeat::new().unwrap();
        let now = now_millis();
        assert!(heartbeat.age(now) < Duration::from_secs(1));
        assert!(!heartbeat.is_stale(now, Duration::from_secs(1)));
    }

    #[test]
    fn test_stale_after_timeout() {
        let heartbeat = Heartbeat::new().unwrap();
        heartbeat.stamp(1_000);

        assert_eq!(heartbeat.age(6_500), Duration::from_millis(5_500));
        assert!(heartbeat.is_stale(6_500, Duration::from_secs(5)));
        assert!(!heartbeat.is_stale(5_900, Duration::from_secs(5)));
    }

    #[test]
    fn test_clock_going_back_is_not_stale() {
        let heartbeat = Heartbeat::new().unwrap();
        heartbeat.stamp(10_000);
        assert_eq!(heartbeat.age(9_000), Duration::ZERO);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let first = now_millis();
        std::thread::sleep(Duration::from_millis(20));
        let second = now_millis();
        assert!(second >= first + 20);
    }

    #[test]
    fn test_touch_updates() {
        let heartbeat = Heartbeat::new().unwrap();
        heartbeat.stamp(0);
        heartbeat.touch();
        assert!(heartbeat.last_touched() > 0);
    }

    #[test]
    fn test_shared_across_fork() {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{fork, ForkResult};

        let heartbeat = Heartbeat::new().unwrap();
        heartbeat.stamp(1);

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                heartbeat.stamp(42);
                unsafe { libc::_exit(0) };
            }
            ForkResult::Parent { child } => {
                assert!(matches!(waitpid(child, None).unwrap(), WaitStatus::Exited(_, 0)));
                assert_eq!(heartbeat.last_touched(), 42);
            }
        }
    }
}
