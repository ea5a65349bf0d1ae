//! # Atención de un Cliente
//! src/server/client.rs
//!
//! Un request/response completo sobre una conexión aceptada:
//!
//! ```text
//! leer head → environment → leer body → app → (100-continue) → head → body
//! ```
//!
//! Ninguna falla sale de aquí: se loguea y la conexión se cierra siempre.

use crate::app::Application;
use crate::error::{Result, ServerError};
use crate::http::environ::{self, Environment};
use crate::http::request::{find_head_end, ParseError, HEAD_TERMINATOR, MAX_HEAD_SIZE};
use crate::http::response::{BAD_REQUEST, CONTINUE_RESPONSE, INTERNAL_SERVER_ERROR};
use crate::http::{build_environment, parse_request_head, serialize_response, Response, StatusCode};
use crate::net::socket::{Connection, RECV_BUF, SEND_BUF};
use nix::errno::Errno;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, SystemTime};

/// Pausa entre chunks del body
const CHUNK_PAUSE: Duration = Duration::from_micros(1);

/// Atiende un request y cierra la conexión.
///
/// El environment (y con él el body del request) se libera antes del
/// cierre en todos los caminos.
pub fn process_client(conn: Connection, app: &dyn Application, timeout: Duration) {
    match handle(&conn, app, timeout) {
        Ok(()) => {}
        Err(ServerError::Parse(e)) => {
            let _ = conn.send(BAD_REQUEST);
            tracing::warn!(error = %e, "Invalid HTTP request");
        }
        Err(ServerError::ConnectionClosed) => {
            tracing::warn!("Client closed connection before a full request");
        }
        Err(ServerError::Application(e)) => {
            let _ = conn.send(INTERNAL_SERVER_ERROR);
            tracing::warn!(error = %e, "Application failed to produce a response");
        }
        Err(e) => {
            tracing::warn!(error = %e, errno = ?e.errno(), "Failed to process client");
        }
    }

    if let Err(e) = conn.shutdown_and_close() {
        tracing::warn!(error = %e, "Failed to close client connection");
    }
}

fn handle(conn: &Connection, app: &dyn Application, timeout: Duration) -> Result<()> {
    let mut env = Environment::new();
    if let Ok(peer) = conn.peer_addr() {
        env.insert(environ::REMOTE_ADDR, peer.ip().to_string());
    }

    let (head, extra) = read_head(conn, timeout)?;
    build_environment(&mut env, parse_request_head(&head)?);
    read_body(conn, &mut env, &extra, timeout)?;

    let mut response = app.call(&mut env).map_err(ServerError::Application)?;
    if response.status == StatusCode::Continue {
        conn.send(CONTINUE_RESPONSE)?;
        env.remove(environ::HTTP_EXPECT);
        response = app.call(&mut env).map_err(ServerError::Application)?;
    }

    send_response(conn, response, timeout)
}

/// Lee hasta el terminador del head. Retorna (head, bytes sobrantes).
///
/// Cada chunk nuevo se busca desde donde terminó la búsqueda anterior (menos
/// lo que puede ser un terminador partido entre dos lecturas).
fn read_head(conn: &Connection, timeout: Duration) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut buffer = Vec::new();
    loop {
        let scanned = buffer.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        let chunk = read_chunk(conn, RECV_BUF, timeout)?;
        buffer.extend_from_slice(&chunk);

        if let Some(pos) = find_head_end(&buffer[scanned..]) {
            let extra = buffer.split_off(scanned + pos + HEAD_TERMINATOR.len());
            return Ok((buffer, extra));
        }
        if buffer.len() > MAX_HEAD_SIZE {
            return Err(ParseError::HeadTooLarge.into());
        }
    }
}

/// Copia el body al environment: primero lo que sobró del head, después
/// lo que falte de `content-length`.
fn read_body(
    conn: &Connection,
    env: &mut Environment,
    extra: &[u8],
    timeout: Duration,
) -> Result<()> {
    env.input.write_all(extra)?;

    let mut remaining = env.content_length().saturating_sub(extra.len() as u64);
    while remaining > 0 {
        let max = remaining.min(RECV_BUF as u64) as usize;
        let chunk = read_chunk(conn, max, timeout)?;
        env.input.write_all(&chunk)?;
        remaining -= chunk.len() as u64;
    }

    env.input.rewind()?;
    Ok(())
}

/// Una lectura acotada por `timeout`. Un socket que todavía no tiene datos
/// (EAGAIN/EINTR) produce un chunk vacío.
fn read_chunk(conn: &Connection, max: usize, timeout: Duration) -> Result<Vec<u8>> {
    if !conn.can_read(Some(timeout))? {
        return Err(ServerError::Timeout);
    }
    match conn.receive(max) {
        Ok(bytes) => Ok(bytes),
        Err(ServerError::Socket(Errno::EAGAIN | Errno::EINTR)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Envía status line y headers, y después el body por chunks
fn send_response(conn: &Connection, mut response: Response, timeout: Duration) -> Result<()> {
    let head = serialize_response(response.status, &mut response.headers, SystemTime::now());
    if !conn.can_write(Some(timeout))? {
        return Err(ServerError::Timeout);
    }
    conn.send(&head)?;

    let to_send = response.content_length().min(response.body.len());
    response.body.rewind()?;

    let mut buf = [0u8; SEND_BUF];
    let mut sent = 0u64;
    while sent < to_send {
        let want = (to_send - sent).min(SEND_BUF as u64) as usize;
        let n = response.body.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        conn.send(&buf[..n])?;
        sent += n as u64;
        thread::sleep(CHUNK_PAUSE);
    }
    Ok(())
}
