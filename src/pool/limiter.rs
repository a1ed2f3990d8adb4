//! Global request pacing shared by all workers in a pool run.
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use super::cancel::CancelToken;

/// Spaces requests evenly at a fixed rate. Each caller reserves the next
/// free slot under a mutex and then sleeps until that slot arrives, so the
/// limit holds across every worker thread at once.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

/// Cap on the pause between requests, so a nonsense rate cannot overflow
/// instant arithmetic.
const MAX_INTERVAL: Duration = Duration::from_secs(3600);

impl RateLimiter {
    /// Build a limiter for `rps` requests per second, or `None` when the
    /// rate is not a positive finite number (limiting disabled).
    pub fn new(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps <= 0.0 {
            return None;
        }
        let interval = Duration::try_from_secs_f64(1.0 / rps).unwrap_or(MAX_INTERVAL);
        Some(Self {
            interval: interval.min(MAX_INTERVAL),
            next_slot: Mutex::new(Instant::now()),
        })
    }

    /// Block until the caller may issue a request, or until cancellation.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<()> {
        let at = self.reserve(Instant::now());
        if cancel.sleep_until(at) {
            Ok(())
        } else {
            Err(anyhow!("run cancelled"))
        }
    }

    /// Reserve the next available slot relative to `now` and return the
    /// instant it begins.
    fn reserve(&self, now: Instant) -> Instant {
        let mut next = self.next_slot.lock();
        let at = (*next).max(now);
        *next = at + self.interval;
        at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_or_negative_rate_disables_limiting() {
        assert!(RateLimiter::new(0.0).is_none());
        assert!(RateLimiter::new(-3.0).is_none());
        assert!(RateLimiter::new(f64::NAN).is_none());
        assert!(RateLimiter::new(f64::INFINITY).is_none());
    }

    #[test]
    fn absurdly_small_rates_cap_the_interval() {
        let limiter = RateLimiter::new(1e-300).unwrap();
        let t0 = Instant::now();
        limiter.reserve(t0);
        assert_eq!(limiter.reserve(t0), t0 + MAX_INTERVAL);
    }

    #[test]
    fn reserve_spaces_slots_by_interval() {
        let limiter = RateLimiter::new(10.0).unwrap();
        let t0 = Instant::now();
        let a = limiter.reserve(t0);
        let b = limiter.reserve(t0);
        let c = limiter.reserve(t0);
        assert_eq!(a, t0);
        assert_eq!(b, t0 + Duration::from_millis(100));
        assert_eq!(c, t0 + Duration::from_millis(200));
    }

    #[test]
    fn reserve_never_returns_a_past_slot() {
        let limiter = RateLimiter::new(10.0).unwrap();
        let t0 = Instant::now();
        limiter.reserve(t0);
        // A caller arriving after the chain has lapsed starts fresh from now.
        let late = t0 + Duration::from_secs(5);
        assert_eq!(limiter.reserve(late), late);
    }

    #[test]
    fn acquire_returns_error_when_cancelled() {
        let limiter = RateLimiter::new(0.5).unwrap();
        let cancel = CancelToken::new();
        limiter.reserve(Instant::now());
        cancel.cancel();
        let err = limiter.acquire(&cancel).unwrap_err();
        assert_eq!(err.to_string(), "run cancelled");
    }
}
