//! Request-id demo server.
//!
//! Run with:
//!   cargo run --example demo -- --port 8080
//!   SENTRY_DSN=https://… cargo run --example demo
//!
//! Try:
//!   curl localhost:8080/ & curl localhost:8080/ & wait   # interleaved ids
//!   curl localhost:8080/f                                # logged 500
//!   curl localhost:8080/e                                # error record with id
//!   curl localhost:8080/missing                          # intentional 404

use std::time::Duration;

use clap::Parser;
use reqtag::{
    HandlerError, HttpError, IdStrategy, Method, Request, RequestIdConfig, RequestIdMiddleware,
    Router, Server, StatusCode,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "demo", about = "Request-id propagation demo server")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "REQTAG_PORT", default_value_t = 8080)]
    port: u16,

    /// Id strategy: `random`, `random:<len>` or `sequential`.
    #[arg(long, env = "REQTAG_ID_STRATEGY", default_value = "random")]
    ids: IdStrategy,

    /// Skip the `Processing …` line at the start of each request.
    #[arg(long)]
    no_handler_names: bool,

    /// Sentry DSN. Requests are tagged with their id when set.
    #[arg(long, env = "SENTRY_DSN")]
    sentry_dsn: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), reqtag::Error> {
    let args = Args::parse();

    // Before anything checks for a client.
    #[cfg(feature = "sentry")]
    let _sentry = args.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((dsn, sentry::ClientOptions { release: sentry::release_name!(), ..Default::default() }))
    });

    reqtag::logging::install();

    #[cfg(not(feature = "sentry"))]
    if args.sentry_dsn.is_some() {
        tracing::warn!("built without the `sentry` feature; ignoring SENTRY_DSN");
    }

    let config = RequestIdConfig { strategy: args.ids, log_handler_name: !args.no_handler_names };
    let app = Router::new()
        .layer(RequestIdMiddleware::from_config(&config))
        .on(Method::GET, "/", hello)
        .on(Method::GET, "/f", fail)
        .on(Method::GET, "/e", log_error)
        .on(Method::GET, "/missing", missing);

    info!(strategy = %args.ids, "starting demo");
    Server::bind(&format!("0.0.0.0:{}", args.port))?.serve(app).await
}

/// Sleeps, so parallel requests interleave in the log.
async fn hello(_req: Request) -> &'static str {
    info!("Doing something");
    tokio::time::sleep(Duration::from_secs(1)).await;
    "Hello, world!\n"
}

async fn fail(_req: Request) -> Result<&'static str, HandlerError> {
    info!("About to fail");
    Err(HandlerError::internal("deliberate failure"))
}

async fn log_error(_req: Request) -> &'static str {
    info!("Started processing request log_error");
    tokio::time::sleep(Duration::from_secs(1)).await;
    error!("something went wrong, but the request carries on");
    tokio::time::sleep(Duration::from_secs(1)).await;
    "Hello, world!\n"
}

async fn missing(_req: Request) -> Result<&'static str, HttpError> {
    Err(HttpError::new(StatusCode::NOT_FOUND).with_body("nothing here\n"))
}
