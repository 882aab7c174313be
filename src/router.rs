//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. A lookup always yields a
//! handler: unmatched requests get a fallback that fails with `404` (or `405`
//! when the path exists under another method), so middleware sees them too.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::HttpError;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Middleware, Stack};
use crate::request::Request;

/// The application router.
///
/// One radix tree per HTTP method, plus the middleware stack every request
/// runs through. Build it once at startup; pass it to
/// [`Server::serve`](crate::Server::serve). Each call returns `self` so
/// registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    not_found: BoxedHandler,
    method_not_allowed: BoxedHandler,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            middleware: Vec::new(),
            not_found: not_found.into_boxed_handler(),
            method_not_allowed: method_not_allowed.into_boxed_handler(),
        }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax. `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use reqtag::{Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// # async fn delete_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::DELETE, "/users/{id}", delete_user)
    ///     .on(Method::GET,    "/users/{id}", get_user)
    ///     .on(Method::POST,   "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup, so this is a
    /// programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Adds a middleware layer. The first layer added is the outermost.
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Resolves a request to a handler and its path parameters.
    pub(crate) fn route(&self, method: &Method, path: &str) -> (BoxedHandler, HashMap<String, String>) {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
            return (Arc::clone(matched.value), params);
        }

        let elsewhere = self
            .routes
            .iter()
            .any(|(other, tree)| other != method && tree.at(path).is_ok());
        let fallback = if elsewhere { &self.method_not_allowed } else { &self.not_found };
        (Arc::clone(fallback), HashMap::new())
    }

    /// Snapshot of the middleware stack, shared by every request.
    pub(crate) fn stack(&self) -> Stack {
        self.middleware.iter().cloned().collect()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

async fn not_found(_req: Request) -> Result<&'static str, HttpError> {
    Err(HttpError::new(StatusCode::NOT_FOUND))
}

async fn method_not_allowed(_req: Request) -> Result<&'static str, HttpError> {
    Err(HttpError::new(StatusCode::METHOD_NOT_ALLOWED))
}
