//! # Prefork Server - Entry Point
//! src/main.rs
//!
//! Levanta el master con una aplicación de ejemplo que responde
//! "Hello, world!" a todo, envuelta en el access log.

use prefork_server::app::{AppError, CommonLogger, Stack};
use prefork_server::config::Config;
use prefork_server::http::{Environment, Response, StatusCode};
use prefork_server::server::{Forker, Master};
use prefork_server::{critical, logging};

fn hello(_env: &mut Environment) -> Result<Response, AppError> {
    let response = Response::new(StatusCode::Ok)
        .with_header("content-type", "text/plain")
        .with_body(b"Hello, world!")?;
    Ok(response)
}

fn main() {
    let config = Config::new();
    logging::init(config.log_level);

    if let Err(e) = config.validate() {
        critical!(error = %e, "Invalid configuration");
        std::process::exit(2);
    }
    config.log_summary();

    let mut stack = Stack::new();
    stack.push(|next| Box::new(CommonLogger::new(next)));
    let app = stack.build(hello);

    let forker = Forker::new(app, config.timeout());
    let mut master = Master::new(config, forker);

    if let Err(e) = master.start() {
        critical!(error = %e, "Master failed");
        std::process::exit(1);
    }
}
