#![forbid(unsafe_code)]

use thiserror::Error;

/// Errors produced by the engine itself.
///
/// They never cross a chain boundary as a Rust `Err`; they are converted into
/// [`Value::Error`](crate::Value::Error) and delivered as rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("TypeError: circular reference: a deferred computation cannot settle with itself")]
    CircularReference,

    #[error("TypeError: {type_name} is not iterable")]
    NotIterable { type_name: &'static str },

    #[error("TypeError: {type_name} is not a function")]
    NotCallable { type_name: &'static str },

    #[error("timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },
}

impl Error {
    #[must_use]
    pub fn timed_out(after: web_time::Duration) -> Self {
        Self::TimedOut {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
