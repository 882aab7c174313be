//! Shared helpers for the integration tests: an in-memory log sink, a server
//! on an ephemeral port, and a bare-bones HTTP/1.1 client.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use reqtag::logging::RequestIdFormat;
use reqtag::{Router, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::subscriber::DefaultGuard;

static REQUEST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[req:([A-Za-z0-9]+)\] ").unwrap());

/// Everything logged on the test's thread while the guard is alive.
#[derive(Clone, Default)]
pub struct Logs(Arc<Mutex<Vec<u8>>>);

impl Logs {
    pub fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).lines().map(str::to_owned).collect()
    }

    /// Lines containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.lines().into_iter().filter(|l| l.contains(needle)).collect()
    }

    /// The one line containing `needle`. Panics if there are none or several.
    pub fn single(&self, needle: &str) -> String {
        let mut found = self.matching(needle);
        assert_eq!(found.len(), 1, "expected one line with {needle:?}, got {found:#?}");
        found.remove(0)
    }
}

impl io::Write for Logs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Routes every record at every level into the returned sink. The tests run
/// on tokio's current-thread runtime, so the server's tasks log here too.
pub fn capture_logs() -> (Logs, DefaultGuard) {
    let logs = Logs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .event_format(RequestIdFormat::new())
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}

/// The `[req:<id>]` of a log line, if it has one.
pub fn request_id(line: &str) -> Option<String> {
    REQUEST_ID.captures(line).map(|c| c[1].to_owned())
}

/// Serves `router` on an ephemeral local port until the test ends.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Server::from_listener(listener).serve_with_shutdown(router, std::future::pending()));
    addr
}

#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// `GET path` on a fresh connection, asking the server to close it afterwards.
pub async fn get(addr: SocketAddr, path: &str) -> RawResponse {
    send(addr, path, "Connection: close\r\n").await
}

/// `GET path` on a keep-alive connection. Only returns if the server closes
/// the connection by itself.
pub async fn get_keep_alive(addr: SocketAddr, path: &str) -> RawResponse {
    send(addr, path, "").await
}

/// Sends `GET path`, then hangs up after `wait` without reading the response.
pub async fn abandon(addr: SocketAddr, path: &str, wait: Duration) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    tokio::time::sleep(wait).await;
    drop(stream);
}

/// Polls `logs` until a line contains `needle`, for at most two seconds.
pub async fn wait_for(logs: &Logs, needle: &str) -> String {
    for _ in 0..200 {
        if let Some(line) = logs.matching(needle).pop() {
            return line;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no line with {needle:?} in {:#?}", logs.lines());
}

async fn send(addr: SocketAddr, path: &str, extra_headers: &str) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nUser-Agent: it-client/1.0\r\n{extra_headers}\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("server did not close the connection")
        .unwrap();

    let raw = String::from_utf8(raw).unwrap();
    let (head, body) = raw.split_once("\r\n\r\n").expect("malformed response");
    let status = head.split(' ').nth(1).and_then(|s| s.parse().ok()).expect("malformed status line");
    RawResponse { status, head: head.to_owned(), body: body.to_owned() }
}
