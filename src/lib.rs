//! # reqtag
//!
//! Request-id propagation for async HTTP services.
//!
//! Every request gets a short id. While the request is handled, every log
//! record it produces, however deep in the call stack, is prefixed with
//! `[req:<id>]`, including the access-log line written after the response is
//! built. Unhandled handler failures are logged with the id and answered with
//! a fixed `500`. When a Sentry client is bound, events captured during the
//! request are tagged `request_id=<id>`.
//!
//! ```text
//! … demo            INFO: [req:Qx4fz9a] Processing GET / (demo::hello)
//! … demo            INFO: [req:Qx4fz9a] Doing something
//! … reqtag::access  INFO: [req:Qx4fz9a] 127.0.0.1 "GET / HTTP/1.1" 200 14 "-" "curl/8.5.0" 0.501234
//! ```
//!
//! ## Pieces
//!
//! - [`id`]: id factories ([`RandomId`], [`SequentialId`], or any closure)
//! - [`context`]: the task-local "current request id"
//! - [`logging`]: the `tracing` formatter that adds the prefix
//! - [`RequestIdMiddleware`]: assigns, binds and cleans up per request
//! - [`access_log`]: access lines carrying the same id
//!
//! The HTTP layer underneath is small on purpose: radix-tree routing via
//! [`matchit`], hyper for the wire, graceful shutdown on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use reqtag::{HandlerError, Method, Request, RequestIdMiddleware, Router, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reqtag::Error> {
//!     reqtag::logging::install();
//!
//!     let app = Router::new()
//!         .layer(RequestIdMiddleware::new())
//!         .on(Method::GET, "/users/{id}", get_user);
//!
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn get_user(req: Request) -> Result<String, HandlerError> {
//!     let id: u64 = req.param("id").unwrap_or_default().parse()?;
//!     tracing::info!("loading user {id}");
//!     Ok(format!("user {id}\n"))
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;
mod tracking;

pub mod access_log;
pub mod config;
pub mod context;
pub mod id;
pub mod logging;
pub mod middleware;

pub use config::{IdStrategy, ParseStrategyError, RequestIdConfig};
pub use error::{BoxError, Error, HandlerError, HttpError};
pub use handler::{BoxFuture, Handler, IntoOutcome, Outcome};
pub use http::{Method, StatusCode};
pub use id::{IdFactory, RandomId, RequestId, SequentialId};
pub use middleware::RequestIdMiddleware;
pub use request::{Attributes, Request, RequestHead};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
