//! Replay suppression for accepted nonces
//!
//! Tracks every nonce the server has honored within a sliding window.
//! A nonce seen again inside the window is a replay; one seen after
//! its window has lapsed counts as fresh and is re-recorded.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Windowed nonce tracker
///
/// Entries expire lazily on collision; [`NonceTracker::sweep`] clears
/// the backlog and is run periodically by the serve path.
pub struct NonceTracker {
    window: Duration,
    seen: Mutex<HashMap<u64, Instant>>,
}

impl NonceTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check freshness and record the nonce
    ///
    /// Returns false when the nonce is still live inside the window.
    /// Two concurrent calls with the same nonce produce exactly one
    /// true result.
    pub fn check_and_record(&self, nonce: u64) -> bool {
        let mut seen = self.seen.lock();
        let now = Instant::now();

        if let Some(first_seen) = seen.get(&nonce) {
            if now.duration_since(*first_seen) <= self.window {
                return false;
            }
        }

        seen.insert(nonce, now);
        true
    }

    /// Drop every entry whose window has lapsed
    pub fn sweep(&self) {
        let now = Instant::now();
        let window = self.window;
        self.seen
            .lock()
            .retain(|_, first_seen| now.duration_since(*first_seen) <= window);
    }

    /// Number of tracked nonces, expired entries included
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}
