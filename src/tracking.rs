//! Error-tracking tag scope.
//!
//! Each request gets its own Sentry hub, forked from the process hub and
//! tagged `request_id=<id>`, so events and breadcrumbs captured while the
//! request runs carry its id and never another request's.
//!
//! Whether that is possible is decided once per process by [`tagging`]: if no
//! Sentry client is bound (or the `sentry` feature is off) requests run
//! untagged and a single warning says so.

use std::future::Future;
use std::sync::OnceLock;

#[cfg(feature = "sentry")]
use std::sync::Arc;

#[cfg(feature = "sentry")]
use futures_util::future::Either;
#[cfg(feature = "sentry")]
use sentry::{Hub, SentryFutureExt};
use tracing::warn;

use crate::id::RequestId;

const TAG: &str = "request_id";

static TAGGING: OnceLock<Tagging> = OnceLock::new();

/// Tagging strategy picked by the capability check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Tagging {
    /// Fork a hub per request and bind it to the request's future.
    #[cfg(feature = "sentry")]
    IsolatedHub,
    /// Nothing to tag.
    Unavailable,
}

/// The process-wide strategy. Probed on first call.
pub(crate) fn tagging() -> Tagging {
    *TAGGING.get_or_init(Tagging::detect)
}

impl Tagging {
    #[cfg(feature = "sentry")]
    fn detect() -> Self {
        let enabled = Hub::current().client().is_some_and(|client| client.is_enabled());
        if enabled {
            return Self::IsolatedHub;
        }
        warn!("no Sentry client is bound; requests will not be tagged with their request id");
        Self::Unavailable
    }

    #[cfg(not(feature = "sentry"))]
    fn detect() -> Self {
        warn!("built without the `sentry` feature; requests will not be tagged with their request id");
        Self::Unavailable
    }

    /// Runs `future` inside a tracking scope tagged with `id`.
    #[cfg(feature = "sentry")]
    pub(crate) fn scope<F>(self, id: &RequestId, future: F) -> impl Future<Output = F::Output> + use<F>
    where
        F: Future,
    {
        match self {
            Self::IsolatedHub => {
                let hub = Arc::new(Hub::new_from_top(Hub::current()));
                hub.configure_scope(|scope| scope.set_tag(TAG, id.as_str()));
                Either::Left(future.bind_hub(hub))
            }
            Self::Unavailable => Either::Right(future),
        }
    }

    #[cfg(not(feature = "sentry"))]
    pub(crate) fn scope<F>(self, _id: &RequestId, future: F) -> impl Future<Output = F::Output> + use<F>
    where
        F: Future,
    {
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_degrades_without_a_client() {
        assert_eq!(tagging(), Tagging::Unavailable);
        // Cached: later calls do not check again.
        assert_eq!(tagging(), Tagging::Unavailable);
    }

    #[tokio::test]
    async fn unavailable_scope_is_transparent() {
        let out = Tagging::Unavailable.scope(&RequestId::from("x"), async { 7 }).await;
        assert_eq!(out, 7);
    }

    #[cfg(feature = "sentry")]
    #[tokio::test]
    async fn isolated_hub_is_bound_while_the_future_runs() {
        let outer = Hub::current();
        let seen = Tagging::IsolatedHub
            .scope(&RequestId::from("abc"), async { Hub::current() })
            .await;
        assert!(!Arc::ptr_eq(&outer, &seen));
        assert!(Arc::ptr_eq(&outer, &Hub::current()));
    }
}
