//! Access logging.
//!
//! The server calls its [`AccessLogger`] once per request, after the response
//! is built and outside any middleware. By then the request-id scope has
//! already closed, so [`RequestIdAccessLogger`] re-binds the id it finds in the
//! request's attributes for the duration of the inner logger's call:
//!
//! ```text
//! 127.0.0.1 "GET /?q=1 HTTP/1.1" 200 14 "-" "curl/8.5.0" 0.501234
//! ```

use std::fmt::Write as _;
use std::time::Duration;

use tracing::info;

use crate::context;
use crate::id::RequestId;
use crate::request::RequestHead;
use crate::response::Response;

/// Target of the records written by [`DefaultAccessLogger`].
pub const TARGET: &str = "reqtag::access";

/// Writes one record per finished request.
pub trait AccessLogger: Send + Sync + 'static {
    fn log(&self, head: &RequestHead, response: &Response, elapsed: Duration);
}

/// Combined-log-style line without the timestamp (the log formatter adds one).
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultAccessLogger;

impl DefaultAccessLogger {
    /// `<peer-ip> "<METHOD> <path?query> <HTTP/x.y>" <status> <bytes> "<referer>" "<user-agent>" <seconds>`
    ///
    /// Missing headers render as `-`.
    pub fn format_line(head: &RequestHead, response: &Response, elapsed: Duration) -> String {
        let target = head.uri().path_and_query().map_or("/", |pq| pq.as_str());
        let mut line = String::with_capacity(128);
        let _ = write!(
            line,
            "{} \"{} {} {:?}\" {} {} \"{}\" \"{}\" {:.6}",
            head.remote_addr().ip(),
            head.method(),
            target,
            head.version(),
            response.status_code().as_u16(),
            response.body().len(),
            head.header("referer").unwrap_or("-"),
            head.header("user-agent").unwrap_or("-"),
            elapsed.as_secs_f64(),
        );
        line
    }
}

impl AccessLogger for DefaultAccessLogger {
    fn log(&self, head: &RequestHead, response: &Response, elapsed: Duration) {
        info!(target: TARGET, "{}", Self::format_line(head, response, elapsed));
    }
}

/// Runs the inner logger with the request's id bound, so the access line gets
/// the same `[req:<id>]` prefix as the handler's lines.
///
/// Requests that never reached [`RequestIdMiddleware`](crate::RequestIdMiddleware)
/// have no id and are logged without one.
#[derive(Clone, Debug)]
pub struct RequestIdAccessLogger<L = DefaultAccessLogger> {
    inner: L,
}

impl Default for RequestIdAccessLogger<DefaultAccessLogger> {
    fn default() -> Self {
        Self::new(DefaultAccessLogger)
    }
}

impl<L> RequestIdAccessLogger<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<L: AccessLogger> AccessLogger for RequestIdAccessLogger<L> {
    fn log(&self, head: &RequestHead, response: &Response, elapsed: Duration) {
        let id = head.attributes().get::<RequestId>();
        context::sync_scope(id, || self.inner.log(head, response, elapsed));
    }
}
