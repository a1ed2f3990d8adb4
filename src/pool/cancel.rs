//! Cancellation signal shared by pool workers, backoff sleeps, and the
//! rate limiter.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A one-way cancellation flag. Cancelling wakes every blocked [`sleep`]
/// immediately; the flag never resets.
///
/// [`sleep`]: CancelToken::sleep
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` unless cancelled first. Returns true when the full
    /// duration elapsed, false on cancellation.
    pub fn sleep(&self, dur: Duration) -> bool {
        self.sleep_until(Instant::now() + dur)
    }

    /// Sleep until `deadline` unless cancelled first.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        let mut guard = self.inner.lock.lock();
        loop {
            if self.is_cancelled() {
                return false;
            }
            if Instant::now() >= deadline {
                return true;
            }
            self.inner.wake.wait_until(&mut guard, deadline);
        }
    }
}
