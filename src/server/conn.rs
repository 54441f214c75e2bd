//! Accepted connection unit
//!
//! Owned by exactly one stage at a time: acceptor, backoff queue, or
//! worker. Dropping it closes the socket, which is how the pipeline
//! keeps the close-exactly-once invariant.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// One accepted transport connection
pub struct Connection {
    pub(crate) stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    accepted_at: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            accepted_at: Instant::now(),
        }
    }

    /// Monotonic id for log correlation
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Time since the listener accepted this connection
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Write one protocol line (LF appended) under a deadline
    pub async fn write_line(&mut self, line: &str, deadline: Duration) -> std::io::Result<()> {
        let payload = format!("{line}\n");
        match tokio::time::timeout(deadline, self.stream.write_all(payload.as_bytes())).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            )),
        }
    }
}
