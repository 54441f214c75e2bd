//! Active-connection cap
//!
//! A counting semaphore with a non-blocking acquire. A session that
//! cannot get a slot is told so immediately rather than waiting.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounds the number of concurrently admitted connections
pub struct ConnectionLimiter {
    limit: usize,
    count: AtomicUsize,
}

impl ConnectionLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: AtomicUsize::new(0),
        }
    }

    /// Take a slot if one is free; the permit returns it on drop
    pub fn acquire(&self) -> Option<ConnPermit<'_>> {
        let acquired = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count < self.limit {
                    Some(count + 1)
                } else {
                    None
                }
            })
            .is_ok();

        if acquired {
            Some(ConnPermit { limiter: self })
        } else {
            None
        }
    }

    /// Currently held slots
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn release(&self) {
        // count never drops below zero
        let _ = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });
    }
}

/// Held connection slot
pub struct ConnPermit<'a> {
    limiter: &'a ConnectionLimiter,
}

impl Drop for ConnPermit<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}
