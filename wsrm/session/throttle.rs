//! Ack-request throttle shared by the call path and the background task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const NEVER: u64 = u64::MAX;

/// One atomic "last ack-request" timestamp, in milliseconds since `epoch`.
///
/// Claiming is a compare-and-swap, so of two paths racing for the same slot
/// exactly one wins and the other observes the fresh timestamp.
#[derive(Debug)]
pub(crate) struct AckRequestThrottle {
    epoch: Instant,
    interval_ms: u64,
    last_ms: AtomicU64,
}

impl AckRequestThrottle {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            epoch: Instant::now(),
            interval_ms: interval.as_millis() as u64,
            last_ms: AtomicU64::new(NEVER),
        }
    }

    fn millis(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn elapsed_since(&self, last: u64, now_ms: u64) -> bool {
        last == NEVER || now_ms.saturating_sub(last) >= self.interval_ms
    }

    /// `true` if at least one interval has passed since the last claim.
    pub(crate) fn is_elapsed(&self, now: Instant) -> bool {
        self.elapsed_since(self.last_ms.load(Ordering::Acquire), self.millis(now))
    }

    /// Take the slot at `now` if the interval has elapsed. Resets the clock.
    pub(crate) fn try_claim(&self, now: Instant) -> bool {
        let now_ms = self.millis(now);
        let last = self.last_ms.load(Ordering::Acquire);
        if !self.elapsed_since(last, now_ms) {
            return false;
        }
        self.last_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
