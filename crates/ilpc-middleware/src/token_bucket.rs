use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Token bucket refilled continuously at `refill_count` per `refill_period`.
///
/// Tokens are tracked in units of one nanosecond of refill period so the
/// refill arithmetic stays exact.
pub struct TokenBucket {
    capacity: u128,
    refill_count: u128,
    unit: u128,
    state: Mutex<BucketState>,
}

struct BucketState {
    left: u128,
    last: Instant,
}

impl TokenBucket {
    /// `capacity` defaults to `refill_count`.
    pub fn new(refill_period: Duration, refill_count: u64, capacity: Option<u64>) -> Self {
        let unit = refill_period.as_nanos();
        let capacity = u128::from(capacity.unwrap_or(refill_count)) * unit;
        Self {
            capacity,
            refill_count: u128::from(refill_count),
            unit,
            state: Mutex::new(BucketState {
                left: capacity,
                last: Instant::now(),
            }),
        }
    }

    /// Take `count` tokens if available.
    pub fn take(&self, count: u64) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last).as_nanos();
        state.last = now;
        state.left = state
            .left
            .saturating_add(elapsed.saturating_mul(self.refill_count))
            .min(self.capacity);

        let needed = u128::from(count).saturating_mul(self.unit);
        if state.left < needed {
            return false;
        }
        state.left -= needed;
        true
    }
}
