//! Retryability tagging and classification for per-item failures.
//!
//! Fallible item functions mark errors they consider worth retrying with
//! [`Retry`]; the pool also recognizes common transient I/O conditions on
//! its own. Everything else fails on the first attempt.
use std::error::Error as StdError;
use std::io;

type Source = Box<dyn StdError + Send + Sync>;

/// Marks an error in a chain as retryable.
///
/// Both variants display as their wrapped source, so tagging never changes
/// the message a failed row ends up carrying.
#[derive(Debug, thiserror::Error)]
pub enum Retry {
    /// Retry under the pool-wide budget.
    #[error("{source}")]
    Transient {
        #[source]
        source: Source,
    },
    /// Retry, but allow at most `extra_retries` attempts beyond the first
    /// even when the pool-wide budget is larger.
    #[error("{source}")]
    Capped {
        #[source]
        source: Source,
        extra_retries: usize,
    },
}

impl Retry {
    /// Wrap `err` as a transiently-failed attempt.
    pub fn transient(err: impl Into<Source>) -> anyhow::Error {
        anyhow::Error::new(Retry::Transient { source: err.into() })
    }

    /// Wrap `err` as retryable with its own lower retry cap.
    pub fn capped(err: impl Into<Source>, extra_retries: usize) -> anyhow::Error {
        anyhow::Error::new(Retry::Capped {
            source: err.into(),
            extra_retries,
        })
    }
}

/// True when any cause in the chain is tagged [`Retry`] or is an I/O error
/// of a kind that tends to clear up on its own.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if cause.downcast_ref::<Retry>().is_some() {
            return true;
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if is_transient_io(io_err) {
                return true;
            }
        }
    }
    false
}

/// Effective extra-attempt budget for one error: the pool default, lowered
/// by a [`Retry::Capped`] tag when one is present in the chain.
pub fn max_extra_retries(default_retries: usize, err: &anyhow::Error) -> usize {
    for cause in err.chain() {
        if let Some(Retry::Capped { extra_retries, .. }) = cause.downcast_ref::<Retry>() {
            return (*extra_retries).min(default_retries);
        }
    }
    default_retries
}

fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
    )
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
