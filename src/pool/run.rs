//! The pool run loop: scoped worker threads around a shared job queue,
//! with a collector draining completions on the calling thread.
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam::channel;

use super::cancel::CancelToken;
use super::limiter::RateLimiter;
use super::retry;
use super::{FailurePolicy, Options};

/// Per-attempt context handed to the item function.
pub struct Ctx {
    deadline: Option<Instant>,
}

impl Ctx {
    /// Time left before this attempt's deadline, or `None` when no timeout
    /// is configured. Saturates at zero once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Outcome for one input item, in input order.
pub type ItemResult<Out> = Result<Out, anyhow::Error>;

/// Process every item and return one result per input, in input order.
///
/// Under [`FailurePolicy::PartialOutput`] a failed item is an `Err` entry
/// in the returned vec and the run itself still succeeds. Under
/// [`FailurePolicy::FailFast`] the first terminal failure cancels the run
/// and becomes the returned error.
pub fn process_all<In, Out, F>(items: &[In], process: F, opts: &Options) -> Result<Vec<ItemResult<Out>>>
where
    In: Sync,
    Out: Send,
    F: Fn(&Ctx, &In) -> Result<Out> + Sync,
{
    process_all_with_callback(items, process, |_idx, _res| Ok(()), opts)
}

/// Like [`process_all`], but invokes `on_result` for each item as it
/// completes, in completion order, on the calling thread. An error from the
/// callback cancels the run and is returned as the run error.
pub fn process_all_with_callback<In, Out, F, C>(
    items: &[In],
    process: F,
    mut on_result: C,
    opts: &Options,
) -> Result<Vec<ItemResult<Out>>>
where
    In: Sync,
    Out: Send,
    F: Fn(&Ctx, &In) -> Result<Out> + Sync,
    C: FnMut(usize, &ItemResult<Out>) -> Result<()>,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let opts = opts.clone().with_defaults();
    let workers = opts.workers.min(items.len());
    let cancel = CancelToken::new();
    let limiter = RateLimiter::new(opts.rate_limit_rps);

    // Pre-fill the queue so workers never block producing jobs.
    let (job_tx, job_rx) = channel::bounded::<(usize, &In)>(items.len());
    for (idx, item) in items.iter().enumerate() {
        let _ = job_tx.send((idx, item));
    }
    drop(job_tx);

    let (done_tx, done_rx) = channel::bounded::<(usize, ItemResult<Out>)>(workers);

    let mut results: Vec<Option<ItemResult<Out>>> = Vec::with_capacity(items.len());
    results.resize_with(items.len(), || None);
    let mut callback_err: Option<anyhow::Error> = None;
    let mut failed_at: Option<usize> = None;

    thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            let cancel = &cancel;
            let limiter = limiter.as_ref();
            let process = &process;
            let opts = &opts;
            scope.spawn(move || {
                for (idx, item) in job_rx.iter() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let outcome = process_with_retry(cancel, limiter, item, process, opts);
                    let failed = outcome.is_err();
                    if done_tx.send((idx, outcome)).is_err() {
                        return;
                    }
                    // Fail fast stops this worker before it can dequeue
                    // another item.
                    if failed && opts.failure_policy == FailurePolicy::FailFast {
                        cancel.cancel();
                        return;
                    }
                }
            });
        }
        drop(done_tx);
        drop(job_rx);

        for (idx, outcome) in done_rx.iter() {
            let cb = on_result(idx, &outcome);
            let failed = outcome.is_err();
            results[idx] = Some(outcome);
            if let Err(err) = cb {
                if callback_err.is_none() {
                    callback_err = Some(err);
                    cancel.cancel();
                }
            } else if failed
                && opts.failure_policy == FailurePolicy::FailFast
                && failed_at.is_none()
            {
                failed_at = Some(idx);
            }
        }
    });

    if let Some(err) = callback_err {
        return Err(err);
    }
    if let Some(idx) = failed_at {
        if let Some(slot) = results.get_mut(idx) {
            if let Some(Err(err)) = slot.take() {
                return Err(err);
            }
        }
        return Err(anyhow!("worker pool failed fast without a recorded error"));
    }

    let mut out = Vec::with_capacity(results.len());
    for (idx, slot) in results.into_iter().enumerate() {
        match slot {
            Some(res) => out.push(res),
            None => return Err(anyhow!("worker pool finished without completing item {idx}")),
        }
    }
    Ok(out)
}

fn process_with_retry<In, Out, F>(
    cancel: &CancelToken,
    limiter: Option<&RateLimiter>,
    item: &In,
    process: &F,
    opts: &Options,
) -> ItemResult<Out>
where
    F: Fn(&Ctx, &In) -> Result<Out>,
{
    let mut attempt: usize = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(anyhow!("run cancelled"));
        }
        if let Some(limiter) = limiter {
            limiter.acquire(cancel)?;
        }
        let deadline = (!opts.request_timeout.is_zero()).then(|| Instant::now() + opts.request_timeout);
        let ctx = Ctx { deadline };
        let err = match process(&ctx, item) {
            Ok(out) => return Ok(out),
            Err(err) => err,
        };
        // A failure observed after cancellation reports the cancellation,
        // not the attempt error.
        if cancel.is_cancelled() {
            return Err(anyhow!("run cancelled"));
        }
        let budget = retry::max_extra_retries(opts.max_retries, &err);
        if !retry::is_retryable(&err) || attempt >= budget {
            return Err(err);
        }
        let pause = backoff_sleep(opts.backoff_initial, opts.backoff_max, opts.backoff_jitter_frac, attempt);
        if !cancel.sleep(pause) {
            return Err(anyhow!("run cancelled"));
        }
        attempt += 1;
    }
}

/// Sleep before retry number `attempt` (0-based): exponential doubling from
/// `initial` capped at `max`, then jittered by `+/- jitter_frac`.
fn backoff_sleep(initial: Duration, max: Duration, jitter_frac: f64, attempt: usize) -> Duration {
    let mut sleep = initial;
    for _ in 0..attempt {
        if sleep >= max {
            sleep = max;
            break;
        }
        sleep = (sleep * 2).min(max);
    }
    if jitter_frac <= 0.0 {
        return sleep;
    }
    let factor = 1.0 + (rand::random::<f64>() * 2.0 - 1.0) * jitter_frac;
    sleep.mul_f64(factor.max(0.0))
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
