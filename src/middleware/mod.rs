//! Middleware layer.
//!
//! Middleware intercepts requests and their outcomes. It is where
//! cross-cutting concerns such as request-id injection live.
//!
//! Middleware is registered on the [`Router`](crate::Router) with
//! [`Router::layer`](crate::Router::layer). The first layer registered is the
//! outermost one:
//!
//! ```text
//! Router::new().layer(A).layer(B)
//!
//!   request ─▶ A ─▶ B ─▶ handler
//!   outcome ◀─ A ◀─ B ◀─┘
//! ```
//!
//! Each layer receives the request and a [`Next`] it may run (or not) and
//! returns an [`Outcome`]. Unmatched routes go through the chain too, as a
//! `404`/`405` [`HttpError`](crate::HttpError), so every request is seen by
//! every layer.
//!
//! Built-in middleware:
//! - [`RequestIdMiddleware`]: per-request id bound for all log output

pub mod request_id;

use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, Outcome};
use crate::request::Request;

pub use request_id::RequestIdMiddleware;

/// A request interceptor.
///
/// ```rust
/// use reqtag::middleware::{Middleware, Next};
/// use reqtag::{BoxFuture, Outcome, Request};
///
/// struct Audit;
///
/// impl Middleware for Audit {
///     fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome> {
///         Box::pin(async move {
///             tracing::info!(path = req.path(), "audit");
///             next.run(req).await
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome>;
}

/// Ordered middleware stack, shared by every request.
pub(crate) type Stack = Arc<[Arc<dyn Middleware>]>;

/// The remainder of the chain: the layers below the current one, then the
/// handler.
pub struct Next {
    handler: BoxedHandler,
    stack: Stack,
    index: usize,
}

impl Next {
    pub(crate) fn new(handler: BoxedHandler, stack: Stack) -> Self {
        Self { handler, stack, index: 0 }
    }

    /// Runs the rest of the chain.
    pub fn run(self, req: Request) -> BoxFuture<Outcome> {
        match self.stack.get(self.index).cloned() {
            Some(layer) => {
                let next = Self { index: self.index + 1, ..self };
                layer.call(req, next)
            }
            None => self.handler.call(req),
        }
    }

    /// Module-qualified name of the handler at the end of the chain.
    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }
}
