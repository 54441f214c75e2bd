//! # powgate
//!
//! A TCP quote service gated by a SHA-256 proof-of-work handshake.
//! Every client must solve a freshly issued hash puzzle before the
//! server answers, so each request costs the caller measurable CPU
//! while verification stays effectively free.
//!
//! ## Core pipeline
//! - Per-connection challenge/response state machine over a
//!   line-delimited protocol
//! - Fixed-size worker pool bounding session concurrency
//! - Back-pressure queue with per-peer exponential retry delay
//! - Token-bucket rate limiting and an active-connection cap
//! - Windowed nonce tracking to suppress replayed proofs

pub mod client;
pub mod config;
pub mod limiter;
pub mod metrics;
pub mod pow;
pub mod quotes;
pub mod server;

// Re-exports
pub use client::{ClientConfig, ClientError, QuoteClient};
pub use config::{ConfigError, Settings};
pub use limiter::{ConnectionLimiter, NonceTracker, TokenBucket};
pub use metrics::{GateMetrics, GateMetricsSnapshot};
pub use pow::{solve, Challenge, ChallengeError};
pub use quotes::{QuoteError, QuoteStore};
pub use server::{BackoffQueue, Connection, Gate, GateError, WorkerPool};

use std::time::Duration;

/// powgate version
pub const POWGATE_VERSION: &str = "0.3.0";

// =============================================================================
// DEFAULT SERVER SETTINGS
// =============================================================================

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port
pub const DEFAULT_PORT: u16 = 8080;

/// Default challenge difficulty in leading zero bits (~65k hashes per solve)
pub const DEFAULT_DIFFICULTY_BITS: u32 = 16;

/// Difficulty ceiling; a SHA-256 digest only has 256 bits to zero out
pub const MAX_DIFFICULTY_BITS: u32 = 256;

/// Default per-read deadline
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-write deadline
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default token-bucket refill rate (requests per second)
pub const DEFAULT_RATE_LIMIT: f64 = 10.0;

/// Default token-bucket burst capacity
pub const DEFAULT_BURST_LIMIT: u64 = 20;

/// Default cap on concurrently admitted connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default number of parallel session workers
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default back-pressure queue capacity
pub const DEFAULT_QUEUE_SIZE: usize = 50;

/// Default exponential backoff base for queued peers
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Default exponential backoff ceiling
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Default replay-suppression window for accepted nonces
pub const DEFAULT_NONCE_WINDOW: Duration = Duration::from_secs(300);

/// Interval at which the dispatcher re-offers queued connections
pub const QUEUE_DRAIN_INTERVAL: Duration = Duration::from_millis(100);
