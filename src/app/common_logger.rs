//! # CommonLogger
//! src/app/common_logger.rs
//!
//! Middleware que registra una línea de acceso por request:
//!
//! ```text
//! 127.0.0.1 - - [19/Oct/2026 10:00:00] 'GET /index?x=1 HTTP/1.1' 200 13 0.0012
//! ```
//!
//! La fecha va en UTC.

use super::{AppError, Application};
use crate::http::environ::{self, Environment};
use crate::http::Response;
use std::time::{Instant, SystemTime};

/// Envuelve una aplicación y registra cada request en el target `access`
pub struct CommonLogger {
    next: Box<dyn Application>,
}

impl CommonLogger {
    pub fn new(next: Box<dyn Application>) -> Self {
        Self { next }
    }
}

impl Application for CommonLogger {
    fn call(&self, env: &mut Environment) -> Result<Response, AppError> {
        let start = Instant::now();
        let response = self.next.call(env)?;
        let elapsed = start.elapsed().as_secs_f64();
        let line = access_line(env, &response, elapsed, SystemTime::now());
        tracing::info!(target: "access", "{}", line);
        Ok(response)
    }
}

/// Arma la línea de acceso
pub fn access_line(
    env: &Environment,
    response: &Response,
    elapsed_secs: f64,
    now: SystemTime,
) -> String {
    let query = match env.get(environ::QUERY_STRING) {
        Some(q) if !q.is_empty() => format!("?{}", q),
        _ => String::new(),
    };

    format!(
        "{} - {} [{}] '{} {}{} {}' {} {} {:.4}",
        env.get(environ::REMOTE_ADDR).unwrap_or("-"),
        env.get("REMOTE_USER").unwrap_or("-"),
        log_date(now),
        env.get(environ::REQUEST_METHOD).unwrap_or("-"),
        env.get(environ::PATH_INFO).unwrap_or(""),
        query,
        env.get(environ::HTTP_VERSION).unwrap_or("-"),
        response.status.as_u16(),
        response.content_length(),
        elapsed_secs,
    )
}

/// `dd/Mon/yyyy HH:MM:SS`, sacado de la fecha RFC 1123
fn log_date(now: SystemTime) -> String {
    let date = crate::http::response::http_date(now);
    // "Sun, 06 Nov 1994 08:49:37 GMT"
    let parts: Vec<&str> = date.split_whitespace().collect();
    if let [_, day, month, year, time, _] = parts[..] {
        return format!("{}/{}/{} {}", day, month, year, time);
    }
    date
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{build_environment, parse_request_head, StatusCode};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_access_line() {
        let mut env = Environment::new();
        build_environment(
            &mut env,
            parse_request_head(b"GET /index?x=1 HTTP/1.1\r\nHost: x").unwrap(),
        );
        env.insert(environ::REMOTE_ADDR, "127.0.0.1");
        let response = Response::new(StatusCode::Ok).with_body(b"Hello, world!").unwrap();

        let now = UNIX_EPOCH + Duration::from_secs(784_111_777);
        let line = access_line(&env, &response, 0.00123, now);
        assert_eq!(
            line,
            "127.0.0.1 - - [06/Nov/1994 08:49:37] 'GET /index?x=1 HTTP/1.1' 200 13 0.0012"
        );
    }

    #[test]
    fn test_log_date_pads_day() {
        let now = UNIX_EPOCH + Duration::from_secs(1_704_067_200);
        assert_eq!(log_date(now), "01/Jan/2024 00:00:00");
    }

    #[test]
    fn test_passes_response_through() {
        fn app(_env: &mut Environment) -> Result<Response, AppError> {
            Ok(Response::new(StatusCode::Created))
        }

        let logger = CommonLogger::new(Box::new(app));
        let mut env = Environment::new();
        let response = logger.call(&mut env).unwrap();
        assert_eq!(response.status, StatusCode::Created);
    }
}
