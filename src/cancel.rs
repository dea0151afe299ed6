//! Cooperative shutdown signal shared by watch loops and executors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag. Setting it asks every loop holding a clone to stop
/// at its next check.
pub type CancelSignal = Arc<AtomicBool>;

/// Granularity of cancellation checks inside blocking waits.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[must_use]
pub fn new_cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::Acquire)
}

pub fn cancel(cancel: &CancelSignal) {
    cancel.store(true, Ordering::Release);
}

/// Sleeps for `duration` in short slices. Returns `false` if the signal fired
/// before the full duration elapsed.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &CancelSignal) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if is_cancelled(cancel) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(CANCEL_POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_returns_early_when_already_cancelled() {
        let signal = new_cancel_signal();
        cancel(&signal);

        let started = Instant::now();
        assert!(!sleep_unless_cancelled(Duration::from_secs(5), &signal));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn sleep_completes_without_cancellation() {
        let signal = new_cancel_signal();
        assert!(sleep_unless_cancelled(Duration::from_millis(30), &signal));
    }
}
