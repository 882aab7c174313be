//! Request-id configuration.
//!
//! Three knobs: which factory mints ids, how long random ids are, and whether
//! the middleware logs a `Processing …` line naming the handler. Loading these
//! from a file or the environment is left to the application; [`IdStrategy`]
//! parses from the short strings a CLI flag or env var would carry.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::id::{DEFAULT_ID_LENGTH, IdFactory, RandomId, SequentialId};

/// Which [`IdFactory`] the middleware uses.
///
/// Parses from `"random"`, `"random:<len>"` and `"sequential"`.
///
/// ```rust
/// use reqtag::IdStrategy;
///
/// assert_eq!("random:12".parse(), Ok(IdStrategy::Random { length: 12 }));
/// assert_eq!("sequential".parse(), Ok(IdStrategy::Sequential));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdStrategy {
    Random { length: usize },
    Sequential,
}

impl IdStrategy {
    pub fn build(self) -> Arc<dyn IdFactory> {
        match self {
            Self::Random { length } => Arc::new(RandomId::new(length)),
            Self::Sequential => Arc::new(SequentialId::new()),
        }
    }
}

impl Default for IdStrategy {
    fn default() -> Self {
        Self::Random { length: DEFAULT_ID_LENGTH }
    }
}

impl fmt::Display for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random { length } => write!(f, "random:{length}"),
            Self::Sequential => f.write_str("sequential"),
        }
    }
}

impl FromStr for IdStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "random" => Ok(Self::default()),
            None if s == "sequential" => Ok(Self::Sequential),
            Some(("random", len)) => match len.parse::<usize>() {
                Ok(length) if length > 0 => Ok(Self::Random { length }),
                _ => Err(ParseStrategyError(s.to_owned())),
            },
            _ => Err(ParseStrategyError(s.to_owned())),
        }
    }
}

/// Returned when a string is not a known [`IdStrategy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseStrategyError(String);

impl fmt::Display for ParseStrategyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown id strategy `{}` (expected `random`, `random:<len>` or `sequential`)",
            self.0
        )
    }
}

impl std::error::Error for ParseStrategyError {}

/// Settings for [`RequestIdMiddleware`](crate::RequestIdMiddleware).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestIdConfig {
    pub strategy: IdStrategy,
    /// Log `Processing <METHOD> <path> (<handler>)` at the start of each
    /// request. Off saves one record per request.
    pub log_handler_name: bool,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self { strategy: IdStrategy::default(), log_handler_name: true }
    }
}
