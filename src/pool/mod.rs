//! Bounded-concurrency worker pool for batch enrichment.
//!
//! The pool maps a per-item function over a fixed batch with a fixed number
//! of OS threads, per-attempt deadlines, transient-failure retries with
//! jittered exponential backoff, and an optional global rate limit. Results
//! come back indexed by input position regardless of completion order.
use std::time::Duration;

mod cancel;
mod limiter;
mod retry;
mod run;

pub use retry::{is_retryable, max_extra_retries, Retry};
pub use run::{process_all, process_all_with_callback, Ctx, ItemResult};

const DEFAULT_WORKERS: usize = 10;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(200);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(2);
const DEFAULT_BACKOFF_JITTER_FRAC: f64 = 0.2;

/// What a terminal per-item failure does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure on that item's result and keep going.
    #[default]
    PartialOutput,
    /// Cancel the run and return the first terminal failure.
    FailFast,
}

/// Pool configuration. Zero worker and backoff fields fall back to the
/// documented defaults when a run starts, so partially-filled options stay
/// usable.
#[derive(Debug, Clone)]
pub struct Options {
    pub workers: usize,
    /// Extra attempts allowed per item beyond the first, for retryable errors.
    pub max_retries: usize,
    /// Deadline applied to each individual attempt. Zero disables the
    /// deadline.
    pub request_timeout: Duration,
    /// Global limit across all workers, in requests per second. `<= 0`
    /// disables limiting.
    pub rate_limit_rps: f64,
    pub failure_policy: FailurePolicy,
    /// Sleep before the first retry of a transient failure.
    pub backoff_initial: Duration,
    /// Cap on the exponential backoff sleep.
    pub backoff_max: Duration,
    /// +/- jitter applied to backoff sleeps (0.2 = +/-20%).
    pub backoff_jitter_frac: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rate_limit_rps: 0.0,
            failure_policy: FailurePolicy::PartialOutput,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
            backoff_jitter_frac: DEFAULT_BACKOFF_JITTER_FRAC,
        }
    }
}

impl Options {
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        if self.backoff_initial.is_zero() {
            self.backoff_initial = DEFAULT_BACKOFF_INITIAL;
        }
        if self.backoff_max.is_zero() {
            self.backoff_max = DEFAULT_BACKOFF_MAX;
        }
        if self.backoff_jitter_frac <= 0.0 {
            self.backoff_jitter_frac = DEFAULT_BACKOFF_JITTER_FRAC;
        }
        self
    }
}
