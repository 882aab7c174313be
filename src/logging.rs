//! Log-line enrichment.
//!
//! Every record formatted by [`RequestIdFormat`] looks like this:
//!
//! ```text
//! 2026-10-19T09:14:03.120512Z [tokio-runtime-worker] demo            INFO: [req:Qx4fz9a] Processing GET / (demo::hello)
//! ╰──── timestamp ──────────╯ ╰──── thread ───────╯ ╰─ target ──╯ ╰level╯ ╰── prefix ─╯ ╰────── message ─────────╯
//! ```
//!
//! The `[req:<id>] ` prefix is read from [`crate::context`] while the record is
//! being formatted, on the thread and inside the task that emitted it. Call
//! sites never pass the id. Records emitted outside a request get no prefix.
//!
//! # Global install
//!
//! [`install`] sets the process-wide `tracing` subscriber. It is guarded: the
//! first call wins and every later call is a no-op. Services that compose their
//! own subscriber use [`RequestIdFormat`] directly instead:
//!
//! ```rust,no_run
//! use reqtag::logging::RequestIdFormat;
//!
//! tracing_subscriber::fmt()
//!     .event_format(RequestIdFormat::new())
//!     .init();
//! ```

use std::fmt;
use std::sync::OnceLock;

use tracing::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self as fmt_layer, MakeWriter};
use tracing_subscriber::fmt::format::{DefaultFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::context;

const DEFAULT_TARGET_WIDTH: usize = 14;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Event formatter that prefixes each message with the current request id.
#[derive(Clone, Debug)]
pub struct RequestIdFormat<T = SystemTime> {
    timer: T,
    target_width: usize,
}

impl RequestIdFormat {
    pub fn new() -> Self {
        Self { timer: SystemTime, target_width: DEFAULT_TARGET_WIDTH }
    }
}

impl Default for RequestIdFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestIdFormat<T> {
    /// Swaps the timestamp source, e.g. for `fmt::time::Uptime` or a fixed
    /// clock in tests.
    pub fn with_timer<T2>(self, timer: T2) -> RequestIdFormat<T2> {
        RequestIdFormat { timer, target_width: self.target_width }
    }

    /// Minimum width the target column is padded to.
    pub fn target_width(mut self, width: usize) -> Self {
        self.target_width = width;
        self
    }
}

impl<S, N, T> FormatEvent<S, N> for RequestIdFormat<T>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    T: FormatTime,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let thread = std::thread::current();

        self.timer.format_time(&mut writer)?;
        write!(
            writer,
            " [{}] {:<width$} {:>5}: {}",
            thread.name().unwrap_or("-"),
            meta.target(),
            meta.level().as_str(),
            context::log_prefix(),
            width = self.target_width,
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Formatting layer writing [`RequestIdFormat`] lines to `writer`.
///
/// ANSI styling is off: field values stay plain text in log files and `grep`.
fn plain_layer<S, T, W>(
    format: RequestIdFormat<T>,
    writer: W,
) -> fmt_layer::Layer<S, DefaultFields, RequestIdFormat<T>, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    T: FormatTime + 'static,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fmt_layer::layer().with_ansi(false).event_format(format).with_writer(writer)
}

/// Installs the global subscriber: `RUST_LOG` filter (default `info`),
/// [`RequestIdFormat`] on stderr, and the Sentry layer when the `sentry`
/// feature is enabled.
///
/// Returns `true` if this crate's subscriber is the global one. `false` means
/// something else installed a subscriber first; the enrichment prefix is then
/// only present if that subscriber uses [`RequestIdFormat`].
pub fn install() -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(plain_layer(RequestIdFormat::new(), std::io::stderr));

        #[cfg(feature = "sentry")]
        let registry = registry.with(sentry::integrations::tracing::layer());

        registry.try_init().is_ok()
    })
}
