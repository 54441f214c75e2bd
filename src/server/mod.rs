//! Connection admission and session pipeline
//!
//! Accepted connections flow acceptor → worker pool, spilling into
//! the back-pressure queue when the pool is saturated. A worker runs
//! one session: admission checks, challenge, verification, reply.

pub mod conn;
pub mod gate;
pub mod pool;
pub mod queue;
pub mod session;

pub use conn::Connection;
pub use gate::{Gate, GateError};
pub use pool::{SessionHandler, WorkerPool};
pub use queue::BackoffQueue;
pub use session::SessionEngine;

// =============================================================================
// PROTOCOL ERROR LINES
// =============================================================================
// Written verbatim (plus the LF terminator) before the server closes.

pub const MSG_CONN_LIMIT: &str = "Connection limit exceeded";
pub const MSG_RATE_LIMIT: &str = "Rate limit exceeded";
pub const MSG_BAD_PROOF: &str = "Invalid proof of work";
pub const MSG_REPLAY: &str = "Replay attack detected";
pub const MSG_BUSY: &str = "Server is busy, please try again later";
pub const MSG_QUEUED: &str = "Server is busy, connection queued";
