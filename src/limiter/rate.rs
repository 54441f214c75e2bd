//! Token-bucket rate limiter
//!
//! Continuous refill, discrete consumption: the bucket gains `rate`
//! tokens per second up to `capacity`, and each admitted request
//! spends one. Allowances reflect real elapsed time between calls;
//! there is no fairness across competing callers.

use parking_lot::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Shared token bucket
///
/// A full bucket at construction, so the configured burst is
/// available immediately.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a bucket refilling at `rate` tokens/sec with `capacity` burst
    pub fn new(rate: f64, capacity: u64) -> Self {
        Self {
            rate,
            capacity: capacity as f64,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Spend one token if available
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.last_refill = now;

        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);

        if state.tokens < 1.0 {
            return false;
        }
        state.tokens -= 1.0;
        true
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u64 {
        self.state.lock().tokens as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_burst_then_deny() {
        let bucket = TokenBucket::new(1.0, 3);

        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_refill_restores_tokens() {
        let bucket = TokenBucket::new(100.0, 1);

        assert!(bucket.allow());
        assert!(!bucket.allow());

        std::thread::sleep(Duration::from_millis(30));
        assert!(bucket.allow());
    }

    #[test]
    fn test_capacity_caps_refill() {
        let bucket = TokenBucket::new(1000.0, 2);

        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.available() <= 2);

        assert!(bucket.allow());
        assert!(bucket.allow());
        assert!(!bucket.allow());
    }

    #[test]
    fn test_grants_bounded_by_capacity_plus_rate() {
        // over ~100ms at 50 tokens/sec with burst 5, at most
        // 5 + 50*0.1 = 10 grants (plus one for timer slop)
        let bucket = TokenBucket::new(50.0, 5);
        let start = Instant::now();

        let mut granted = 0;
        while start.elapsed() < Duration::from_millis(100) {
            if bucket.allow() {
                granted += 1;
            }
        }
        assert!(granted <= 11, "granted {granted}");
    }
}
