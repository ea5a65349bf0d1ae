//! # Environment del Request
//! src/http/environ.rs
//!
//! Mapa de variables que recibe la aplicación por cada conexión, construido
//! a partir del request head. Vive hasta que la respuesta se termina de
//! escribir.

use super::body::Body;
use super::request::RequestHead;
use std::collections::BTreeMap;

pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
pub const HTTP_VERSION: &str = "HTTP_VERSION";
pub const PATH_INFO: &str = "PATH_INFO";
pub const QUERY_STRING: &str = "QUERY_STRING";
pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
pub const SERVER_NAME: &str = "SERVER_NAME";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
pub const HTTP_EXPECT: &str = "HTTP_EXPECT";

/// Puerto si el header Host no trae uno
pub const DEFAULT_PORT: u16 = 80;

/// Environment de un request
#[derive(Debug)]
pub struct Environment {
    vars: BTreeMap<String, String>,
    /// Body del request, posicionado al inicio
    pub input: Body,
    /// Stream de errores para la aplicación
    pub errors: std::io::Stderr,
    pub multithread: bool,
    pub multiprocess: bool,
    pub version: (u8, u8),
    pub url_scheme: &'static str,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
            input: Body::new(),
            errors: std::io::stderr(),
            multithread: true,
            multiprocess: true,
            version: (1, 1),
            url_scheme: "http",
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Todas las variables, ordenadas por nombre
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Content-Length del request (0 si falta o no es numérico)
    pub fn content_length(&self) -> u64 {
        self.get(CONTENT_LENGTH)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Llena el environment a partir del request head.
///
/// - método y versión se copian tal cual
/// - el target se separa en path y query string (sin manejo de fragmentos)
/// - `host` se separa en nombre y puerto (80 por defecto)
/// - `content-length`/`content-type` van a sus propias claves
/// - el resto de headers queda como `HTTP_<NOMBRE>`
pub fn build_environment(env: &mut Environment, head: RequestHead) {
    let RequestHead {
        method,
        target,
        version,
        mut headers,
    } = head;

    env.insert(REQUEST_METHOD, method);
    env.insert(HTTP_VERSION, version);

    let (path, query) = split_target(&target);
    env.insert(PATH_INFO, path);
    env.insert(QUERY_STRING, query);
    env.insert(SCRIPT_NAME, "");

    if let Some(host) = headers.remove("host") {
        let (name, port) = split_host(&host);
        env.insert(SERVER_NAME, name);
        env.insert(SERVER_PORT, port.to_string());
    }

    for field in ["content-length", "content-type"] {
        if let Some(value) = headers.remove(field) {
            env.insert(cgi_name(field), value);
        }
    }

    for (name, value) in headers {
        env.insert(format!("HTTP_{}", cgi_name(&name)), value);
    }
}

/// "/a/b?x=1" → ("/a/b", "x=1")
fn split_target(target: &str) -> (&str, &str) {
    match target.find('?') {
        Some(pos) => (&target[..pos], &target[pos + 1..]),
        None => (target, ""),
    }
}

/// "example.com:8080" → ("example.com", 8080)
fn split_host(host: &str) -> (&str, u16) {
    match host.find(':') {
        Some(pos) => {
            let port = host[pos + 1..].parse().unwrap_or(DEFAULT_PORT);
            (&host[..pos], port)
        }
        None => (host, DEFAULT_PORT),
    }
}

/// "x-forwarded-for" → "X_FORWARDED_FOR"
fn cgi_name(header: &str) -> String {
    header.replace('-', "_").to_uppercase()
}
