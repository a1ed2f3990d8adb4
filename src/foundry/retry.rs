//! Bounded retry for transient platform failures.
use std::io;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use super::error::find_api_error;

const ATTEMPTS: usize = 8;
const INITIAL_SLEEP: Duration = Duration::from_millis(200);
const MAX_SLEEP: Duration = Duration::from_secs(2);

/// Run `f`, retrying transient failures with a doubling backoff.
///
/// Rate limits (429) and server errors (5xx) are transient, as are
/// connection-level timeouts, resets, and refusals. Everything else is
/// returned on the first failure.
pub fn retry_transient<T>(f: impl FnMut() -> Result<T>) -> Result<T> {
    retry_with(ATTEMPTS, INITIAL_SLEEP, f)
}

fn retry_with<T>(attempts: usize, initial_sleep: Duration, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut sleep = initial_sleep;
    let mut attempt = 0;
    loop {
        let err = match f() {
            Ok(v) => return Ok(v),
            Err(err) => err,
        };
        attempt += 1;
        if attempt >= attempts || !is_transient(&err) {
            return Err(err);
        }
        thread::sleep(sleep);
        sleep = (sleep * 2).min(MAX_SLEEP);
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(api) = find_api_error(err) {
        return api.status == 429 || (500..600).contains(&api.status);
    }
    for cause in err.chain() {
        if let Some(ue) = cause.downcast_ref::<ureq::Error>() {
            match ue {
                ureq::Error::Timeout(_) | ureq::Error::ConnectionFailed => return true,
                ureq::Error::Io(io_err) => return is_transient_io(io_err),
                _ => return false,
            }
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return is_transient_io(io_err);
        }
    }
    false
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
