//! Incoming HTTP request type and its per-request attribute bag.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri, Version};

// ── Attributes ────────────────────────────────────────────────────────────────

/// Typed per-request storage shared by every holder of the same request.
///
/// The server keeps one handle and the [`Request`] given to middleware and
/// handlers holds another, so values inserted while handling are still
/// readable by the access logger after the handler has consumed the request.
/// The request-id middleware stores the request's
/// [`RequestId`](crate::RequestId) here.
#[derive(Clone, Default)]
pub struct Attributes(Arc<Mutex<Extensions>>);

impl Attributes {
    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T>(&self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).insert(value)
    }

    /// A clone of the stored value of type `T`.
    pub fn get<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).get::<T>().cloned()
    }

    pub fn remove<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).remove::<T>()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.0.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Attributes").field("len", &len).finish()
    }
}

// ── RequestHead ───────────────────────────────────────────────────────────────

/// Everything about a request except its body and route parameters.
///
/// This is what the [`AccessLogger`](crate::access_log::AccessLogger) sees once
/// the response is ready.
#[derive(Clone, Debug)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    remote_addr: SocketAddr,
    attributes: Attributes,
}

impl RequestHead {
    pub(crate) fn new(parts: http::request::Parts, remote_addr: SocketAddr) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            remote_addr,
            attributes: Attributes::default(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn query(&self) -> Option<&str> { self.uri.query() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn attributes(&self) -> &Attributes { &self.attributes }

    /// Header value as text. `None` if missing or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

// ── Request ───────────────────────────────────────────────────────────────────

/// An incoming HTTP request with its body fully buffered.
#[derive(Debug)]
pub struct Request {
    head: RequestHead,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn new(head: RequestHead, body: Bytes, params: HashMap<String, String>) -> Self {
        Self { head, body, params }
    }

    pub fn method(&self) -> &Method { self.head.method() }
    pub fn path(&self) -> &str { self.head.path() }
    pub fn query(&self) -> Option<&str> { self.head.query() }
    pub fn headers(&self) -> &HeaderMap { self.head.headers() }
    pub fn header(&self, name: &str) -> Option<&str> { self.head.header(name) }
    pub fn remote_addr(&self) -> SocketAddr { self.head.remote_addr() }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn head(&self) -> &RequestHead { &self.head }

    /// The request's attribute bag. Shared with the server's copy of the head.
    pub fn attributes(&self) -> &Attributes { self.head.attributes() }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn head(method: Method, uri: &str) -> RequestHead {
        let (parts, ()) = http::Request::builder()
            .method(method)
            .uri(uri)
            .header("user-agent", "test-agent/1.0")
            .body(())
            .unwrap()
            .into_parts();
        RequestHead::new(parts, "127.0.0.1:40000".parse().unwrap())
    }

    pub(crate) fn request(method: Method, uri: &str) -> Request {
        Request::new(head(method, uri), Bytes::new(), HashMap::new())
    }
}
