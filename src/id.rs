//! Request identifiers and the factories that mint them.
//!
//! A [`RequestId`] is a short opaque string that ends up in every log line a
//! request produces. It has to survive being pasted into a shell, a URL or a
//! `grep` pattern, so both factories stick to `[A-Za-z0-9]`.
//!
//! | Factory | Shape | Guarantee |
//! |---|---|---|
//! | [`RandomId`] | `N` chars, default 7 | collisions unlikely, not impossible |
//! | [`SequentialId`] | 4-letter prefix + 4+ digit counter | no repeats within one process |

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Length of identifiers produced by [`RandomId::default`].
pub const DEFAULT_ID_LENGTH: usize = 7;

const PREFIX_LEN: usize = 4;

// ── RequestId ─────────────────────────────────────────────────────────────────

/// Identifier assigned to one request when it enters the middleware.
///
/// Cloning is one atomic increment: the same value is stored in the request's
/// attribute bag, bound in the task-local context and tagged on the error
/// tracking scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── IdFactory ─────────────────────────────────────────────────────────────────

/// Produces a fresh identifier on every call.
///
/// Implemented for [`RandomId`], [`SequentialId`] and any plain closure:
///
/// ```rust
/// use reqtag::IdFactory;
///
/// let fixed = || "static".to_owned();
/// assert_eq!(fixed.generate(), "static");
/// ```
pub trait IdFactory: Send + Sync + 'static {
    fn generate(&self) -> String;
}

impl<F> IdFactory for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn generate(&self) -> String {
        self()
    }
}

// ── RandomId ──────────────────────────────────────────────────────────────────

/// Random identifiers of a fixed length.
///
/// Draws `len` bytes from the thread-local CSPRNG, encodes them as URL-safe
/// base64 and keeps the first `len` characters. `_` and `-` are then replaced
/// with `x` and `X`, which skews the alphabet slightly towards those two
/// letters.
#[derive(Clone, Copy, Debug)]
pub struct RandomId {
    len: usize,
}

impl RandomId {
    /// A zero length is treated as 1.
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }

    pub fn length(&self) -> usize {
        self.len
    }
}

impl Default for RandomId {
    fn default() -> Self {
        Self::new(DEFAULT_ID_LENGTH)
    }
}

impl IdFactory for RandomId {
    fn generate(&self) -> String {
        let mut id = random_token(self.len);
        id.truncate(self.len);
        id.replace('_', "x").replace('-', "X")
    }
}

/// URL-safe base64 of `bytes` random bytes. Always at least `bytes` chars long.
fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(&buf)
}

// ── SequentialId ──────────────────────────────────────────────────────────────

type Identity = Box<dyn Fn() -> u32 + Send + Sync>;

/// Prefix + counter identifiers: `QfzK0000`, `QfzK0001`, …
///
/// The prefix is drawn once per process identity (the OS pid by default) so
/// two workers writing to the same log stream never emit the same value. A
/// changed identity (fork, restart inside the same address space, or a test
/// swapping the identity source) draws a new prefix and restarts the counter
/// at zero.
///
/// Calls from concurrent tasks are serialised by an internal mutex.
pub struct SequentialId {
    identity: Identity,
    state: Mutex<SequenceState>,
}

#[derive(Default)]
struct SequenceState {
    owner: Option<u32>,
    prefix: String,
    counter: u64,
}

impl SequentialId {
    pub fn new() -> Self {
        Self::with_identity(std::process::id)
    }

    /// Uses `identity` instead of the pid to detect that the owning process
    /// changed.
    pub fn with_identity(identity: impl Fn() -> u32 + Send + Sync + 'static) -> Self {
        Self { identity: Box::new(identity), state: Mutex::new(SequenceState::default()) }
    }
}

impl Default for SequentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SequentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SequentialId")
            .field("owner", &state.owner)
            .field("prefix", &state.prefix)
            .field("counter", &state.counter)
            .finish()
    }
}

impl IdFactory for SequentialId {
    fn generate(&self) -> String {
        let owner = (self.identity)();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.owner != Some(owner) {
            state.owner = Some(owner);
            state.prefix = readable_prefix();
            state.counter = 0;
        }

        let id = format!("{}{:04}", state.prefix, state.counter);
        state.counter += 1;
        id
    }
}

/// Four letters, none of which can be misread as a digit or as each other.
fn readable_prefix() -> String {
    loop {
        // 3 bytes encode to exactly 4 base64 characters.
        let candidate = random_token(3);
        if candidate.len() == PREFIX_LEN && candidate.chars().all(is_readable) {
            return candidate;
        }
    }
}

fn is_readable(c: char) -> bool {
    c.is_ascii_alphabetic() && c != 'l' && c != 'I'
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn split(id: &str) -> (&str, u64) {
        let (prefix, counter) = id.split_at(PREFIX_LEN);
        (prefix, counter.parse().unwrap())
    }

    #[test]
    fn random_ids_have_exact_length_and_no_unsafe_chars() {
        for len in 1..=64 {
            let factory = RandomId::new(len);
            for _ in 0..20 {
                let id = factory.generate();
                assert_eq!(id.len(), len, "{id:?}");
                assert!(!id.contains('_') && !id.contains('-'), "{id:?}");
                assert!(id.chars().all(|c| c.is_ascii_alphanumeric()), "{id:?}");
            }
        }
    }

    #[test]
    fn random_default_length_is_seven() {
        assert_eq!(RandomId::default().generate().len(), 7);
        assert_eq!(RandomId::new(9).generate().len(), 9);
    }

    #[test]
    fn random_zero_length_is_clamped() {
        assert_eq!(RandomId::new(0).generate().len(), 1);
    }

    #[test]
    fn random_ids_rarely_collide() {
        let factory = RandomId::default();
        let ids: HashSet<_> = (0..1000).map(|_| factory.generate()).collect();
        assert!(ids.len() > 990);
    }

    #[test]
    fn sequential_ids_share_prefix_and_increase() {
        let factory = SequentialId::new();
        let ids: Vec<_> = (0..50).map(|_| factory.generate()).collect();

        let (prefix, first) = split(&ids[0]);
        assert_eq!(first, 0);
        assert_eq!(ids[0].len(), 8);

        for pair in ids.windows(2) {
            let (pa, a) = split(&pair[0]);
            let (pb, b) = split(&pair[1]);
            assert_eq!(pa, prefix);
            assert_eq!(pb, prefix);
            assert_eq!(b, a + 1);
        }
    }

    #[test]
    fn sequential_resets_when_identity_changes() {
        let pid = Arc::new(AtomicU32::new(100));
        let source = Arc::clone(&pid);
        let factory = SequentialId::with_identity(move || source.load(Ordering::SeqCst));

        factory.generate();
        factory.generate();
        let before = factory.generate();
        assert_eq!(split(&before).1, 2);

        pid.store(200, Ordering::SeqCst);
        let after = factory.generate();
        assert_eq!(split(&after).1, 0);

        // A fresh prefix is drawn; with 48^4 choices a repeat is a fluke, so
        // only the counter reset is asserted strictly.
        let next = factory.generate();
        assert_eq!(split(&next).0, split(&after).0);
        assert_eq!(split(&next).1, 1);
    }

    #[test]
    fn sequential_prefixes_are_readable() {
        let pid = Arc::new(AtomicU32::new(0));
        let source = Arc::clone(&pid);
        let factory = SequentialId::with_identity(move || source.load(Ordering::SeqCst));

        let mut distinct = HashSet::new();
        for owner in 0..500 {
            pid.store(owner, Ordering::SeqCst);
            let id = factory.generate();
            let (prefix, _) = split(&id);
            assert_eq!(prefix.len(), 4);
            assert!(prefix.chars().all(is_readable), "{prefix:?}");
            for banned in ['l', 'I', '_', '-'] {
                assert!(!prefix.contains(banned), "{prefix:?}");
            }
            distinct.insert(prefix.to_owned());
        }

        // Every identity change draws a new prefix; 500 draws from 48^4
        // collide at most a handful of times.
        assert!(distinct.len() > 490, "only {} distinct prefixes", distinct.len());
    }

    #[test]
    fn sequential_counter_widens_past_four_digits() {
        let factory = SequentialId::new();
        let last = (0..=10_000).map(|_| factory.generate()).last().unwrap();
        assert_eq!(split(&last).1, 10_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sequential_never_repeats_under_concurrency() {
        let factory = Arc::new(SequentialId::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let factory = Arc::clone(&factory);
            tasks.spawn(async move { (0..250).map(|_| factory.generate()).collect::<Vec<_>>() });
        }

        let mut seen = HashSet::new();
        while let Some(ids) = tasks.join_next().await {
            for id in ids.unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn closures_are_factories() {
        let factory: Box<dyn IdFactory> = Box::new(|| "fixed".to_owned());
        assert_eq!(factory.generate(), "fixed");
    }
}
