//! Error types.
//!
//! Two families, never mixed:
//!
//! - [`Error`]: infrastructure failures surfaced by [`Server`](crate::Server)
//!   (binding a port, reading the listener address).
//! - [`HandlerError`]: what a handler returns instead of a response. Either an
//!   intentional status ([`HttpError`]) that the server renders as-is, or an
//!   unexpected failure that the request-id middleware turns into a `500`.

use std::fmt;

use http::StatusCode;

use crate::response::Response;

/// Boxed error carried by [`HandlerError::Internal`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error type returned by reqtag's fallible server operations.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    InvalidAddress(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::InvalidAddress(addr) => write!(f, "invalid socket address `{addr}`"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidAddress(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// A handler deliberately answering with a specific status.
///
/// Not a failure: the middleware logs it at `debug` and lets it through, and
/// the server renders it. The default body is `"<code>: <reason>"`.
///
/// ```rust
/// use reqtag::{HttpError, Request, Response, StatusCode};
///
/// async fn get_user(req: Request) -> Result<Response, HttpError> {
///     match req.param("id") {
///         Some("42") => Ok(Response::text("alice")),
///         _ => Err(HttpError::new(StatusCode::NOT_FOUND)),
///     }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpError {
    status: StatusCode,
    body: Option<String>,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self { status, body: None }
    }

    /// Replaces the default `"<code>: <reason>"` body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.status.canonical_reason().unwrap_or("Unknown"))
    }
}

impl HttpError {
    /// The response the server sends for this error.
    pub(crate) fn render(self) -> Response {
        let body = self.body.clone().unwrap_or_else(|| self.to_string());
        Response::builder().status(self.status).text(body)
    }
}

// ── HandlerError ──────────────────────────────────────────────────────────────

/// Failure returned by a handler.
///
/// Any `std::error::Error + Send + Sync` converts into
/// [`HandlerError::Internal`], so handlers can use `?` freely. [`HttpError`]
/// converts into [`HandlerError::Http`].
///
/// `HandlerError` itself does not implement `std::error::Error`; that is what
/// keeps the blanket conversion coherent.
pub enum HandlerError {
    /// Intentional status, rendered as-is.
    Http(HttpError),
    /// Anything else. Logged with the request id and turned into a `500`.
    Internal(BoxError),
}

impl HandlerError {
    /// Internal failure from a plain message.
    pub fn internal(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Internal(message.into())
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => f.debug_tuple("Http").field(e).finish(),
            Self::Internal(e) => f.debug_tuple("Internal").field(e).finish(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => fmt::Display::fmt(e, f),
            Self::Internal(e) => {
                write!(f, "{e}")?;
                let mut source = e.source();
                while let Some(cause) = source {
                    write!(f, ": {cause}")?;
                    source = cause.source();
                }
                Ok(())
            }
        }
    }
}

impl From<HttpError> for HandlerError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        Self::Internal(Box::new(e))
    }
}
