//! Admission-control primitives
//!
//! The three gates a session passes before any work is done: a
//! token-bucket rate limiter, a non-blocking cap on live connections,
//! and a replay-window tracker for accepted nonces.

pub mod conn;
pub mod rate;
pub mod replay;

pub use conn::{ConnPermit, ConnectionLimiter};
pub use rate::TokenBucket;
pub use replay::NonceTracker;
