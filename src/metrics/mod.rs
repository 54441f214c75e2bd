//! Gate metrics
//!
//! In-process counters and gauges for the admission pipeline, plus an
//! exponential-bucket histogram of session durations. Everything is
//! atomic; [`GateMetrics::snapshot`] produces a plain struct for
//! logging and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Session-duration histogram bucket count; bucket `i` holds sessions
/// shorter than `2^i` milliseconds, the last bucket holds the rest
pub const SESSION_BUCKETS: usize = 16;

/// Counters and gauges for one running gate
#[derive(Debug)]
pub struct GateMetrics {
    /// Connections accepted by the listener
    pub connections_total: AtomicU64,
    /// Sessions currently in flight
    pub connections_active: AtomicU64,
    /// Challenges written to clients
    pub challenges_issued: AtomicU64,
    /// Proofs that verified and were answered
    pub proofs_verified: AtomicU64,
    /// Proofs that failed verification
    pub verification_failures: AtomicU64,
    /// Nonces rejected by the replay window
    pub replays_rejected: AtomicU64,
    /// Sessions refused by the token bucket
    pub rate_limit_hits: AtomicU64,
    /// Sessions refused by the connection cap
    pub conn_limit_hits: AtomicU64,
    /// Connections turned away with the busy line
    pub queue_rejections: AtomicU64,
    /// Configured worker count
    pub pool_size: AtomicU64,
    /// Connections waiting in the pool channel
    pub pool_queue_depth: AtomicU64,
    /// Connections parked in the backoff queue
    pub backoff_queue_depth: AtomicU64,

    session_buckets: [AtomicU64; SESSION_BUCKETS],
    sessions_completed: AtomicU64,
    session_micros_total: AtomicU64,
}

impl GateMetrics {
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            challenges_issued: AtomicU64::new(0),
            proofs_verified: AtomicU64::new(0),
            verification_failures: AtomicU64::new(0),
            replays_rejected: AtomicU64::new(0),
            rate_limit_hits: AtomicU64::new(0),
            conn_limit_hits: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            pool_size: AtomicU64::new(0),
            pool_queue_depth: AtomicU64::new(0),
            backoff_queue_depth: AtomicU64::new(0),
            session_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sessions_completed: AtomicU64::new(0),
            session_micros_total: AtomicU64::new(0),
        }
    }

    /// Record one finished session of any outcome
    pub fn record_session(&self, duration: Duration) {
        let index = bucket_index(duration.as_millis() as u64);
        self.session_buckets[index].fetch_add(1, Ordering::Relaxed);
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        self.session_micros_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Non-atomic copy of every value
    pub fn snapshot(&self) -> GateMetricsSnapshot {
        let sessions_completed = self.sessions_completed.load(Ordering::Relaxed);
        let micros_total = self.session_micros_total.load(Ordering::Relaxed);

        GateMetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            challenges_issued: self.challenges_issued.load(Ordering::Relaxed),
            proofs_verified: self.proofs_verified.load(Ordering::Relaxed),
            verification_failures: self.verification_failures.load(Ordering::Relaxed),
            replays_rejected: self.replays_rejected.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            conn_limit_hits: self.conn_limit_hits.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            pool_size: self.pool_size.load(Ordering::Relaxed),
            pool_queue_depth: self.pool_queue_depth.load(Ordering::Relaxed),
            backoff_queue_depth: self.backoff_queue_depth.load(Ordering::Relaxed),
            session_buckets: std::array::from_fn(|i| {
                self.session_buckets[i].load(Ordering::Relaxed)
            }),
            sessions_completed,
            session_avg_micros: if sessions_completed > 0 {
                micros_total / sessions_completed
            } else {
                0
            },
        }
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`GateMetrics`] (non-atomic, cloneable)
#[derive(Debug, Clone)]
pub struct GateMetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub challenges_issued: u64,
    pub proofs_verified: u64,
    pub verification_failures: u64,
    pub replays_rejected: u64,
    pub rate_limit_hits: u64,
    pub conn_limit_hits: u64,
    pub queue_rejections: u64,
    pub pool_size: u64,
    pub pool_queue_depth: u64,
    pub backoff_queue_depth: u64,
    pub session_buckets: [u64; SESSION_BUCKETS],
    pub sessions_completed: u64,
    pub session_avg_micros: u64,
}

fn bucket_index(millis: u64) -> usize {
    let mut index = 0;
    let mut bound = 1u64;
    while index < SESSION_BUCKETS - 1 && millis >= bound {
        bound <<= 1;
        index += 1;
    }
    index
}
