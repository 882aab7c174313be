//! Request-id middleware.
//!
//! Gives every request an id, binds it for everything the request does, and
//! turns unhandled failures into a logged `500`:
//!
//! ```text
//! received ─▶ id assigned ─▶ context bound ─▶ handler ─┬─▶ success ─────────┐
//!                                                      ├─▶ HttpError (debug) ┤
//!                                                      ├─▶ error/panic ─▶ 500┤
//!                                                      └─▶ dropped (info)    │
//!                                     context unbound ◀──────────────────────┘
//! ```
//!
//! Register it first so every other layer and the access logger see the id:
//!
//! ```rust,no_run
//! use reqtag::{Method, Request, RequestIdMiddleware, Router};
//!
//! async fn hello(_req: Request) -> &'static str {
//!     "Hello, world!\n"
//! }
//!
//! let app = Router::new()
//!     .layer(RequestIdMiddleware::new())
//!     .on(Method::GET, "/", hello);
//! ```

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, error, info};

use crate::config::RequestIdConfig;
use crate::context;
use crate::error::HandlerError;
use crate::handler::{BoxFuture, Outcome};
use crate::id::{IdFactory, RandomId, RequestId};
use crate::middleware::{Middleware, Next};
use crate::request::Request;
use crate::response::Response;
use crate::tracking::{self, Tagging};

/// Assigns and binds a [`RequestId`] for each request.
///
/// The id is also stored in the request's
/// [`Attributes`](crate::Attributes), where the access logger picks it up.
pub struct RequestIdMiddleware {
    factory: Arc<dyn IdFactory>,
    log_handler_name: bool,
    tagging: Tagging,
}

impl RequestIdMiddleware {
    /// Random 7-character ids, handler names logged.
    pub fn new() -> Self {
        Self {
            factory: Arc::new(RandomId::default()),
            log_handler_name: true,
            tagging: tracking::tagging(),
        }
    }

    pub fn from_config(config: &RequestIdConfig) -> Self {
        Self {
            factory: config.strategy.build(),
            log_handler_name: config.log_handler_name,
            tagging: tracking::tagging(),
        }
    }

    /// Replaces the id factory.
    pub fn factory(mut self, factory: impl IdFactory) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Whether to log `Processing <METHOD> <path> (<handler>)` on entry.
    pub fn log_handler_name(mut self, enabled: bool) -> Self {
        self.log_handler_name = enabled;
        self
    }
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestIdMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestIdMiddleware")
            .field("log_handler_name", &self.log_handler_name)
            .field("tagging", &self.tagging)
            .finish_non_exhaustive()
    }
}

impl Middleware for RequestIdMiddleware {
    fn call(&self, req: Request, next: Next) -> BoxFuture<Outcome> {
        let id = RequestId::new(self.factory.generate());
        req.attributes().insert(id.clone());

        // The tracking scope is opened inside the context scope so anything
        // it logs already carries the id.
        let handled = self.tagging.scope(&id, handle(req, next, self.log_handler_name));
        Box::pin(context::scope(id, handled))
    }
}

async fn handle(req: Request, next: Next, log_handler_name: bool) -> Outcome {
    if log_handler_name {
        info!("Processing {} {} ({})", req.method(), req.path(), next.handler_name());
    }

    let mut guard = CancelGuard { armed: true };
    let caught = AssertUnwindSafe(next.run(req)).catch_unwind().await;
    guard.armed = false;

    match caught {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(HandlerError::Http(e))) => {
            debug!(status = e.status().as_u16(), "Request ended with {e}");
            Err(HandlerError::Http(e))
        }
        Ok(Err(err)) => {
            error!(error = ?err, "Error handling request: {err}");
            Ok(Response::internal_error())
        }
        Err(payload) => {
            error!("Handler panicked: {}", panic_message(payload.as_ref()));
            Ok(Response::internal_error())
        }
    }
}

/// Logs when the request future is dropped before the handler finished.
///
/// The context scope drops its inner future while the id is still bound, so
/// the line carries the id.
struct CancelGuard {
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            info!("Request cancelled");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::{Method, StatusCode};

    use super::*;
    use crate::error::HttpError;
    use crate::handler::Handler;
    use crate::logging::test_support::capture;
    use crate::request::test_support::request;
    use crate::response::INTERNAL_ERROR_BODY;

    fn run(mw: RequestIdMiddleware, handler: impl Handler, req: Request) -> BoxFuture<Outcome> {
        let stack: Arc<[Arc<dyn Middleware>]> = vec![Arc::new(mw) as Arc<dyn Middleware>].into();
        Next::new(handler.into_boxed_handler(), stack).run(req)
    }

    fn fixed(id: &'static str) -> RequestIdMiddleware {
        RequestIdMiddleware::new().factory(move || id.to_owned())
    }

    async fn hello(req: Request) -> String {
        tracing::info!("Doing something");
        format!("{:?}|{:?}", context::current(), req.attributes().get::<RequestId>())
    }

    async fn fails(_req: Request) -> Result<Response, HandlerError> {
        Err(HandlerError::internal("database unreachable"))
    }

    async fn panics(_req: Request) -> Response {
        panic!("index out of bounds");
    }

    async fn missing(_req: Request) -> Result<Response, HttpError> {
        Err(HttpError::new(StatusCode::NOT_FOUND))
    }

    async fn slow(_req: Request) -> &'static str {
        tokio::time::sleep(Duration::from_secs(10)).await;
        "late"
    }

    #[tokio::test]
    async fn binds_the_id_for_the_handler_and_stores_it() {
        let (logs, _guard) = capture();
        let req = request(Method::GET, "/");
        let attributes = req.attributes().clone();

        let res = run(fixed("abc1234"), hello, req).await.unwrap();

        let expected = Some(RequestId::from("abc1234"));
        assert_eq!(res.body(), format!("{expected:?}|{expected:?}").as_bytes());
        assert_eq!(attributes.get::<RequestId>(), expected);
        assert_eq!(context::current(), None);

        let lines: Vec<_> = logs.lines().into_iter().filter(|l| l.contains("[req:")).collect();
        assert!(lines[0].ends_with(
            "[req:abc1234] Processing GET / (reqtag::middleware::request_id::tests::hello)"
        ));
        assert!(lines[1].ends_with("[req:abc1234] Doing something"));
    }

    #[tokio::test]
    async fn internal_errors_become_a_logged_500() {
        let (logs, _guard) = capture();
        let res = run(fixed("err0001"), fails, request(Method::GET, "/f")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body(), INTERNAL_ERROR_BODY.as_bytes());
        assert_eq!(res.header("connection"), Some("close"));

        let errors: Vec<_> = logs.lines().into_iter().filter(|l| l.contains("ERROR:")).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ERROR: [req:err0001] "));
        assert!(errors[0].contains("Error handling request: database unreachable"));
    }

    #[tokio::test]
    async fn panics_become_a_logged_500() {
        let (logs, _guard) = capture();
        let res = run(fixed("pan0001"), panics, request(Method::GET, "/")).await.unwrap();

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            logs.lines()
                .iter()
                .any(|l| l.contains("ERROR: [req:pan0001] Handler panicked: index out of bounds"))
        );
    }

    #[tokio::test]
    async fn http_errors_pass_through_at_debug() {
        let (logs, _guard) = capture();
        let outcome = run(fixed("nf00001"), missing, request(Method::GET, "/missing")).await;

        assert!(matches!(outcome, Err(HandlerError::Http(e)) if e.status() == StatusCode::NOT_FOUND));
        let lines = logs.lines();
        assert!(lines.iter().any(|l| l.contains("DEBUG: [req:nf00001] Request ended with 404: Not Found")));
        assert!(!lines.iter().any(|l| l.contains("ERROR:")));
    }

    #[tokio::test]
    async fn handler_name_line_can_be_disabled() {
        let (logs, _guard) = capture();
        let mw = fixed("quiet01").log_handler_name(false);
        run(mw, hello, request(Method::GET, "/")).await.unwrap();

        let lines = logs.lines();
        assert!(!lines.iter().any(|l| l.contains("Processing")));
        assert!(lines.iter().any(|l| l.ends_with("[req:quiet01] Doing something")));
    }

    #[tokio::test]
    async fn cancellation_is_logged_with_the_id() {
        let (logs, _guard) = capture();
        let fut = run(fixed("gone001"), slow, request(Method::GET, "/slow"));

        assert!(tokio::time::timeout(Duration::from_millis(20), fut).await.is_err());

        assert!(logs.lines().iter().any(|l| l.ends_with("INFO: [req:gone001] Request cancelled")));
        assert_eq!(context::current(), None);
    }

    #[tokio::test]
    async fn each_request_gets_a_fresh_id() {
        let mw = Arc::new(RequestIdMiddleware::new());
        let mut seen = Vec::new();
        for _ in 0..3 {
            let req = request(Method::GET, "/");
            let attributes = req.attributes().clone();
            let stack: Arc<[Arc<dyn Middleware>]> = vec![Arc::clone(&mw) as Arc<dyn Middleware>].into();
            Next::new(hello.into_boxed_handler(), stack).run(req).await.unwrap();
            let id = attributes.get::<RequestId>().unwrap();
            assert_eq!(id.as_str().len(), 7);
            seen.push(id);
        }
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn from_config_uses_the_configured_strategy() {
        let config = RequestIdConfig {
            strategy: crate::config::IdStrategy::Sequential,
            log_handler_name: false,
        };
        let mw = RequestIdMiddleware::from_config(&config);
        assert!(!mw.log_handler_name);
        assert!(mw.factory.generate().ends_with("0000"));
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "<non-string panic payload>");
    }
}
