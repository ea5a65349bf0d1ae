//! # Aplicaciones y Middleware
//! src/app/mod.rs
//!
//! El servidor solo necesita "algo que recibe un environment y devuelve una
//! respuesta". Este módulo define ese contrato y la composición de
//! middleware alrededor de una aplicación.
//!
//! ```text
//! Request → [CommonLogger → ... → App] → Response
//! ```

pub mod common_logger;

pub use common_logger::CommonLogger;

use crate::http::{Environment, Response};

/// Error que una aplicación puede reportar; el worker responde 500
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Contrato de una aplicación
pub trait Application {
    fn call(&self, env: &mut Environment) -> Result<Response, AppError>;
}

impl<F> Application for F
where
    F: Fn(&mut Environment) -> Result<Response, AppError>,
{
    fn call(&self, env: &mut Environment) -> Result<Response, AppError> {
        self(env)
    }
}

/// Constructor de middleware: recibe la aplicación siguiente y la envuelve
pub type Layer = Box<dyn FnOnce(Box<dyn Application>) -> Box<dyn Application>>;

/// Lista ordenada de middleware. El primero agregado queda más afuera.
///
/// # Ejemplo
/// ```
/// use prefork_server::app::{AppError, Application, CommonLogger, Stack};
/// use prefork_server::http::{Environment, Response, StatusCode};
///
/// fn no_content(_env: &mut Environment) -> Result<Response, AppError> {
///     Ok(Response::new(StatusCode::NoContent))
/// }
///
/// let mut stack = Stack::new();
/// stack.push(|next| Box::new(CommonLogger::new(next)));
///
/// let app = stack.build(no_content);
/// let response = app.call(&mut Environment::new()).unwrap();
/// assert_eq!(response.status, StatusCode::NoContent);
/// ```
#[derive(Default)]
pub struct Stack {
    layers: Vec<Layer>,
}

impl Stack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn push<F>(&mut self, layer: F)
    where
        F: FnOnce(Box<dyn Application>) -> Box<dyn Application> + 'static,
    {
        self.layers.push(Box::new(layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Compone de derecha a izquierda: la última capa envuelve a `inner`
    pub fn build<A>(self, inner: A) -> Box<dyn Application>
    where
        A: Application + 'static,
    {
        let mut app: Box<dyn Application> = Box::new(inner);
        for layer in self.layers.into_iter().rev() {
            app = layer(app);
        }
        app
    }
}
