//! Task-local "current request id".
//!
//! # Why task-local and not thread-local
//!
//! tokio multiplexes many request tasks onto each worker thread, and a task
//! can resume on a different thread after every `.await`. A thread-local
//! would hand request A's id to request B the moment they interleave. A
//! [`tokio::task_local!`] travels with the task instead:
//!
//! ```text
//! thread 1:  [A: log "x"] [B: log "y"] [A: log "z"]
//!                 ↓             ↓            ↓
//!              [req:A]       [req:B]      [req:A]
//! ```
//!
//! # Scopes and restore tokens
//!
//! [`scope`] and [`sync_scope`] bind an id for the duration of a future or a
//! closure. Leaving the scope restores whatever was visible before, on every
//! exit path: completion, `?`, panic, or the future being dropped.
//!
//! Inside an active scope, [`set`] swaps the id in place and returns a
//! [`Restore`] token that swaps it back.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::id::RequestId;

/// The id storage of one scope. [`Restore`] tokens hold on to it, so they
/// always write back into the scope that created them.
type Slot = Arc<Mutex<Option<RequestId>>>;

tokio::task_local! {
    static CURRENT: Slot;
}

fn slot(id: Option<RequestId>) -> Slot {
    Arc::new(Mutex::new(id))
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<RequestId>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The id bound to the calling task, if any.
pub fn current() -> Option<RequestId> {
    CURRENT.try_with(|slot| lock(slot).clone()).ok().flatten()
}

/// The text the log formatter puts in front of every message: `[req:<id>] `,
/// or nothing outside a request.
pub fn log_prefix() -> String {
    current().map(|id| format!("[req:{id}] ")).unwrap_or_default()
}

/// Runs `future` with `id` bound for every poll.
pub fn scope<F>(id: RequestId, future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    CURRENT.scope(slot(Some(id)), future)
}

/// Runs `f` with `id` bound, or with no id at all when `id` is `None`.
pub fn sync_scope<R>(id: Option<RequestId>, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(slot(id), f)
}

/// Replaces the id bound by the enclosing [`scope`].
///
/// Returns `None` when called outside any scope; there is nowhere to store
/// the id in that case.
pub fn set(id: RequestId) -> Option<Restore> {
    CURRENT
        .try_with(|slot| {
            let previous = lock(slot).replace(id);
            Restore { slot: Arc::clone(slot), previous: Some(previous) }
        })
        .ok()
}

/// Token returned by [`set`]. Puts the previous id back when restored or
/// dropped.
///
/// The id goes back into the scope [`set`] was called in, even when the token
/// is dropped inside a nested scope or after its own scope has ended. A
/// nested scope's binding is never touched.
#[must_use = "dropping the token immediately undoes the `set`"]
#[derive(Debug)]
pub struct Restore {
    slot: Slot,
    // Outer `Option` is `None` once restored.
    previous: Option<Option<RequestId>>,
}

impl Restore {
    pub fn restore(mut self) {
        self.put_back();
    }

    fn put_back(&mut self) {
        if let Some(previous) = self.previous.take() {
            *lock(&self.slot) = previous;
        }
    }
}

impl Drop for Restore {
    fn drop(&mut self) {
        self.put_back();
    }
}
