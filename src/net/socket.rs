//! # Sockets TCP
//! src/net/socket.rs
//!
//! Envoltorio delgado sobre sockets POSIX. El socket de escucha se comparte
//! entre todos los workers después del fork, así que aquí todo trabaja con
//! descriptores crudos y el cierre es explícito (`shutdown_and_close`).

use crate::error::{Result, ServerError};
use crate::net::readiness::{self, Interest};
use nix::errno::Errno;
use nix::sys::socket::{
    self, sockopt, AddressFamily, Backlog, MsgFlags, SockFlag, SockType, SockaddrIn,
};
use nix::unistd;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

/// Tamaño de lectura por defecto
pub const RECV_BUF: usize = 16384;

/// Tamaño de los chunks al enviar el body
pub const SEND_BUF: usize = 4096;

/// Backlog fijo de `listen(2)`
pub const BACKLOG: i32 = 1024;

/// Reintentos de `close(2)` interrumpido
const CLOSE_RETRIES: usize = 2;

/// Descriptor con cierre explícito; `Drop` solo cierra si nadie lo hizo antes
#[derive(Debug)]
struct Socket {
    fd: RawFd,
    open: bool,
}

impl Socket {
    fn new(fd: RawFd) -> Self {
        Self { fd, open: true }
    }

    /// Shutdown best-effort y luego close
    fn shutdown_and_close(&mut self) -> Result<()> {
        if self.open {
            let _ = socket::shutdown(self.fd, socket::Shutdown::Both);
        }
        self.close()
    }

    /// Close reintentando si lo interrumpen
    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let mut retries = 0;
        loop {
            match unistd::close(self.fd) {
                Ok(()) => return Ok(()),
                Err(Errno::EINTR) if retries + 1 < CLOSE_RETRIES => retries += 1,
                Err(errno) => return Err(ServerError::Socket(errno)),
            }
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.open {
            let _ = unistd::close(self.fd);
        }
    }
}

/// Socket de escucha
#[derive(Debug)]
pub struct Listener {
    socket: Socket,
    address: SocketAddrV4,
}

impl Listener {
    /// Crea el socket, aplica opciones, hace bind y listen.
    ///
    /// Fallar al aplicar SO_REUSEADDR o TCP_NODELAY solo genera un warning.
    /// `port = 0` deja que el kernel elija; `address()` devuelve lo real.
    pub fn bind_and_listen(iface: Ipv4Addr, port: u16) -> Result<Self> {
        let owned = socket::socket(AddressFamily::Inet, SockType::Stream, SockFlag::empty(), None)?;

        let reuse = socket::setsockopt(&owned, sockopt::ReuseAddr, &true);
        let nodelay = socket::setsockopt(&owned, sockopt::TcpNoDelay, &true);
        if reuse.is_err() || nodelay.is_err() {
            tracing::warn!("Failed to set some socket options");
        }

        socket::bind(owned.as_raw_fd(), &SockaddrIn::from(SocketAddrV4::new(iface, port)))?;
        let backlog = Backlog::new(BACKLOG)?;
        socket::listen(&owned, backlog)?;

        let bound: SockaddrIn = socket::getsockname(owned.as_raw_fd())?;
        let address = SocketAddrV4::from(bound);

        Ok(Self {
            socket: Socket::new(owned.into_raw_fd()),
            address,
        })
    }

    /// Duplica el descriptor (lo usa cada worker para tener el suyo)
    pub fn duplicate(&self) -> Result<Self> {
        let fd = unistd::dup(self.socket.fd)?;
        Ok(Self {
            socket: Socket::new(fd),
            address: self.address,
        })
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd
    }

    /// Pone el socket en modo no bloqueante (afecta a todos los procesos
    /// que comparten la descripción de archivo)
    pub fn set_nonblocking(&self) -> Result<()> {
        set_nonblocking(self.socket.fd)
    }

    /// ¿Un `accept()` no bloquearía?
    pub fn can_accept(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(readiness::is_ready(self.socket.fd, Interest::Read, timeout)?)
    }

    /// Acepta una conexión
    pub fn accept(&self) -> Result<Connection> {
        let fd = socket::accept(self.socket.fd)?;
        Ok(Connection::from_raw_fd(fd))
    }

    pub fn shutdown_and_close(mut self) -> Result<()> {
        self.socket.shutdown_and_close()
    }

    /// Cierra solo este descriptor. Un `shutdown` en el socket de escucha
    /// dejaría sin accept a todos los procesos que lo comparten.
    pub fn close(mut self) -> Result<()> {
        self.socket.close()
    }
}

/// Socket de una conexión aceptada
#[derive(Debug)]
pub struct Connection {
    socket: Socket,
}

impl Connection {
    pub fn from_raw_fd(fd: RawFd) -> Self {
        Self {
            socket: Socket::new(fd),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.fd
    }

    /// Dirección del cliente
    pub fn peer_addr(&self) -> Result<SocketAddrV4> {
        let peer: SockaddrIn = socket::getpeername(self.socket.fd)?;
        Ok(SocketAddrV4::from(peer))
    }

    pub fn can_read(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(readiness::is_ready(self.socket.fd, Interest::Read, timeout)?)
    }

    pub fn can_write(&self, timeout: Option<Duration>) -> Result<bool> {
        Ok(readiness::is_ready(self.socket.fd, Interest::Write, timeout)?)
    }

    /// Lee hasta `max` bytes.
    ///
    /// # Errores
    ///
    /// * `ConnectionClosed` si el peer cerró (lectura de cero bytes)
    /// * `Socket(errno)` para cualquier otra falla
    pub fn receive(&self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let n = socket::recv(self.socket.fd, &mut buf, MsgFlags::empty())?;
        if n == 0 {
            return Err(ServerError::ConnectionClosed);
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Escribe todos los bytes; retorna el total escrito
    pub fn send(&self, mut data: &[u8]) -> Result<usize> {
        let mut total = 0;
        while !data.is_empty() {
            match socket::send(self.socket.fd, data, MsgFlags::MSG_NOSIGNAL) {
                Ok(n) => {
                    data = &data[n..];
                    total += n;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    self.can_write(Some(Duration::from_millis(100)))?;
                }
                Err(errno) => return Err(ServerError::Socket(errno)),
            }
        }
        Ok(total)
    }

    pub fn shutdown_and_close(mut self) -> Result<()> {
        self.socket.shutdown_and_close()
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    fn ephemeral_listener() -> Listener {
        Listener::bind_and_listen(Ipv4Addr::LOCALHOST, 0).expect("bind")
    }

    #[test]
    fn test_bind_records_real_port() {
        let listener = ephemeral_listener();
        assert_ne!(listener.port(), 0);
        assert_eq!(*listener.address().ip(), Ipv4Addr::LOCALHOST);
        listener.shutdown_and_close().unwrap();
    }

    #[test]
    fn test_can_accept_times_out_without_clients() {
        let listener = ephemeral_listener();
        assert!(!listener.can_accept(Some(Duration::from_millis(10))).unwrap());
    }

    #[test]
    fn test_accept_receive_send() {
        let listener = ephemeral_listener();
        let addr = listener.address();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).unwrap();
            buf
        });

        assert!(listener.can_accept(Some(Duration::from_secs(5))).unwrap());
        let conn = listener.accept().unwrap();
        assert_eq!(*conn.peer_addr().unwrap().ip(), Ipv4Addr::LOCALHOST);
        assert!(conn.can_read(Some(Duration::from_secs(5))).unwrap());
        assert_eq!(conn.receive(RECV_BUF).unwrap(), b"ping");
        assert!(conn.can_write(Some(Duration::from_secs(1))).unwrap());
        assert_eq!(conn.send(b"pong").unwrap(), 4);
        conn.shutdown_and_close().unwrap();

        assert_eq!(client.join().unwrap(), b"pong");
    }

    #[test]
    fn test_receive_reports_connection_closed() {
        let listener = ephemeral_listener();
        let addr = listener.address();

        drop(TcpStream::connect(addr).unwrap());

        let conn = listener.accept().unwrap();
        assert!(conn.can_read(Some(Duration::from_secs(5))).unwrap());
        assert!(matches!(conn.receive(RECV_BUF), Err(ServerError::ConnectionClosed)));
    }

    #[test]
    fn test_accept_on_nonblocking_listener_without_clients() {
        let listener = ephemeral_listener();
        listener.set_nonblocking().unwrap();
        match listener.accept() {
            Err(ServerError::Socket(errno)) => assert_eq!(errno, Errno::EAGAIN),
            other => panic!("expected EAGAIN, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_shares_port() {
        let listener = ephemeral_listener();
        let dup = listener.duplicate().unwrap();
        assert_ne!(dup.fd(), listener.fd());
        assert_eq!(dup.port(), listener.port());
    }

    #[test]
    fn test_closing_duplicate_keeps_original_listening() {
        let listener = ephemeral_listener();
        listener.duplicate().unwrap().close().unwrap();

        let addr = listener.address();
        let client = thread::spawn(move || TcpStream::connect(addr).is_ok());
        assert!(listener.can_accept(Some(Duration::from_secs(5))).unwrap());
        listener.accept().unwrap().shutdown_and_close().unwrap();
        assert!(client.join().unwrap());
    }
}
