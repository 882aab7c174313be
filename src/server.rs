//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`. No new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! # Per-request flow
//!
//! ```text
//! hyper request ─▶ buffer body ─▶ route ─▶ middleware chain ─▶ handler
//!                       │                                        │
//!                       └─▶ 400 (body read failed)               ▼
//!                                              render Outcome ─▶ access log ─▶ hyper response
//! ```
//!
//! The access logger runs after the middleware chain has returned. It sees
//! the same [`Attributes`](crate::Attributes) as the handler did, which is how
//! it finds the request id.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::access_log::{AccessLogger, DefaultAccessLogger, RequestIdAccessLogger};
use crate::error::{Error, HandlerError, HttpError};
use crate::handler::Outcome;
use crate::middleware::{Next, Stack};
use crate::request::{Request, RequestHead};
use crate::response::Response;
use crate::router::Router;

enum Listen {
    Addr(SocketAddr),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    listen: Listen,
    access_log: Option<Arc<dyn AccessLogger>>,
}

/// Everything a connection task needs, shared across all of them.
struct App {
    router: Router,
    stack: Stack,
    access_log: Option<Arc<dyn AccessLogger>>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use reqtag::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), reqtag::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr = addr.parse().map_err(|_| Error::InvalidAddress(addr.to_owned()))?;
        Ok(Self::with(Listen::Addr(addr)))
    }

    /// Serves on an already bound listener. Bind to port `0` and read
    /// `local_addr()` first to get an ephemeral port.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self::with(Listen::Listener(listener))
    }

    fn with(listen: Listen) -> Self {
        Self { listen, access_log: Some(Arc::new(RequestIdAccessLogger::new(DefaultAccessLogger))) }
    }

    /// Replaces the default access logger
    /// ([`RequestIdAccessLogger`] around
    /// [`DefaultAccessLogger`](crate::access_log::DefaultAccessLogger)).
    pub fn access_log(mut self, logger: impl AccessLogger) -> Self {
        self.access_log = Some(Arc::new(logger));
        self
    }

    pub fn without_access_log(mut self) -> Self {
        self.access_log = None;
        self
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but stops accepting when `signal`
    /// resolves instead of on SIGTERM/Ctrl-C.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = match self.listen {
            Listen::Addr(addr) => TcpListener::bind(addr).await?,
            Listen::Listener(listener) => listener,
        };
        let local_addr = listener.local_addr()?;

        let app = Arc::new(App { stack: router.stack(), router, access_log: self.access_log });

        info!(addr = %local_addr, "reqtag listening");

        // Tracks every spawned connection task so shutdown can wait for them.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = signal;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a signal stops accepting even with
                // connections still queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { dispatch(app, req, remote_addr).await }
                        });

                        // HTTP/1.1 or HTTP/2, whichever the client speaks.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            if client_went_away(&*e) {
                                debug!(peer = %remote_addr, "client closed the connection: {e}");
                            } else {
                                error!(peer = %remote_addr, "connection error: {e}");
                            }
                        }
                    });
                }

                // Reap finished connection tasks so the set does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("reqtag stopped");
        Ok(())
    }
}

/// The peer hung up before the exchange finished. Not a server fault; the
/// request-id middleware has already logged the cancellation.
fn client_went_away(e: &(dyn std::error::Error + 'static)) -> bool {
    e.downcast_ref::<hyper::Error>()
        .is_some_and(|e| e.is_incomplete_message() || e.is_canceled())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request and produces one response.
///
/// Never fails: every error becomes a status code before hyper sees it.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();
    let head = RequestHead::new(parts, remote_addr);

    let response = match body.collect().await {
        Ok(collected) => {
            let (handler, params) = app.router.route(head.method(), head.path());
            let req = Request::new(head.clone(), collected.to_bytes(), params);
            render(Next::new(handler, Arc::clone(&app.stack)).run(req).await)
        }
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            HttpError::new(StatusCode::BAD_REQUEST).render()
        }
    };

    if let Some(logger) = &app.access_log {
        logger.log(&head, &response, started.elapsed());
    }

    Ok(response.into_inner())
}

fn render(outcome: Outcome) -> Response {
    match outcome {
        Ok(response) => response,
        Err(HandlerError::Http(e)) => e.render(),
        // Only reachable without the request-id middleware in the chain.
        Err(err) => {
            error!("Error handling request: {err}");
            Response::internal_error()
        }
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available. A handler that cannot be installed
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
