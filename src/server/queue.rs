//! Back-pressure queue with per-peer exponential delay
//!
//! When the worker pool is saturated, connections park here instead
//! of being refused outright. A peer that keeps landing in the queue
//! earns an exponentially growing delay before its connection becomes
//! eligible again, which starves retry storms without touching
//! well-behaved clients.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::debug;

use super::conn::Connection;

struct QueuedConn {
    conn: Connection,
    next_eligible: Instant,
}

struct QueueState {
    ring: VecDeque<QueuedConn>,
    attempts: HashMap<SocketAddr, u32>,
}

/// Bounded ring of deferred connections
pub struct BackoffQueue {
    capacity: usize,
    base: Duration,
    max: Duration,
    state: Mutex<QueueState>,
}

impl BackoffQueue {
    pub fn new(capacity: usize, base: Duration, max: Duration) -> Self {
        Self {
            capacity,
            base,
            max,
            state: Mutex::new(QueueState {
                ring: VecDeque::with_capacity(capacity),
                attempts: HashMap::new(),
            }),
        }
    }

    /// Park a connection
    ///
    /// The delay grows with the peer's enqueue count; the count is
    /// incremented on every add and cleared when [`BackoffQueue::get`]
    /// hands the peer's connection out. A full ring hands the
    /// connection back.
    pub fn add(&self, conn: Connection) -> Result<(), Connection> {
        let mut state = self.state.lock();

        if state.ring.len() >= self.capacity {
            return Err(conn);
        }

        let peer = conn.peer();
        let attempts = state.attempts.get(&peer).copied().unwrap_or(0);
        let delay = self.backoff(attempts);

        debug!(
            conn_id = conn.id(),
            %peer,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "connection parked in backoff queue"
        );

        state.ring.push_back(QueuedConn {
            conn,
            next_eligible: Instant::now() + delay,
        });
        state.attempts.insert(peer, attempts + 1);
        Ok(())
    }

    /// Take the first queued connection whose delay has lapsed
    ///
    /// Scans from the head; returns None without mutating anything
    /// when no entry is eligible yet.
    pub fn get(&self) -> Option<Connection> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let index = state
            .ring
            .iter()
            .position(|queued| queued.next_eligible <= now)?;
        let queued = state.ring.remove(index)?;
        state.attempts.remove(&queued.conn.peer());
        Some(queued.conn)
    }

    /// Drop every queued connection and reset all attempt counters
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.ring.len();
        state.ring.clear();
        state.attempts.clear();
        if dropped > 0 {
            debug!(dropped, "backoff queue cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().ring.len() >= self.capacity
    }

    /// Recorded enqueue count for a peer
    pub fn attempts_for(&self, peer: SocketAddr) -> u32 {
        self.state.lock().attempts.get(&peer).copied().unwrap_or(0)
    }

    /// Delay before a connection's `attempts`-th requeue becomes
    /// eligible: 0 for the first, then base·2^(k−1) capped at max
    pub fn backoff(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map(|delay| delay.min(self.max))
            .unwrap_or(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn stream_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (stream, _peer) = listener.accept().await.unwrap();
        (stream, client)
    }

    async fn test_conn() -> (Connection, TcpStream) {
        let (stream, client) = stream_pair().await;
        let peer = stream.peer_addr().unwrap();
        (Connection::new(stream, peer), client)
    }

    fn queue(capacity: usize) -> BackoffQueue {
        BackoffQueue::new(
            capacity,
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_backoff_formula() {
        let queue = queue(4);

        assert_eq!(queue.backoff(0), Duration::ZERO);
        assert_eq!(queue.backoff(1), Duration::from_millis(100));
        assert_eq!(queue.backoff(2), Duration::from_millis(200));
        assert_eq!(queue.backoff(6), Duration::from_millis(3200));
        // 6.4s caps at the 5s ceiling
        assert_eq!(queue.backoff(7), Duration::from_secs(5));
        assert_eq!(queue.backoff(40), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_first_enqueue_is_immediately_eligible() {
        let queue = queue(4);
        let (conn, _client) = test_conn().await;
        let conn_id = conn.id();

        queue.add(conn).unwrap_or_else(|_| panic!("queue full"));
        assert_eq!(queue.len(), 1);

        let taken = queue.get().expect("eligible connection");
        assert_eq!(taken.id(), conn_id);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_hands_connection_back() {
        let queue = queue(1);
        let (first, _c1) = test_conn().await;
        let (second, _c2) = test_conn().await;

        assert!(queue.add(first).is_ok());
        assert!(queue.is_full());
        assert!(queue.add(second).is_err());
    }

    #[tokio::test]
    async fn test_repeat_peer_earns_delay() {
        let queue = BackoffQueue::new(4, Duration::from_millis(50), Duration::from_secs(5));
        let peer: SocketAddr = "10.0.0.1:9999".parse().unwrap();

        let (stream_a, _ca) = stream_pair().await;
        let (stream_b, _cb) = stream_pair().await;

        // same peer address on both: the second add carries backoff
        queue
            .add(Connection::new(stream_a, peer))
            .unwrap_or_else(|_| panic!("queue full"));
        assert_eq!(queue.attempts_for(peer), 1);
        queue
            .add(Connection::new(stream_b, peer))
            .unwrap_or_else(|_| panic!("queue full"));
        assert_eq!(queue.attempts_for(peer), 2);

        // first entry was enqueued with zero attempts: immediate
        assert!(queue.get().is_some());
        // second entry still waits out base·2^0
        assert!(queue.get().is_none());
        assert_eq!(queue.len(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(queue.get().is_some());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_clears_peer_attempts() {
        let queue = queue(4);
        let (conn, _client) = test_conn().await;
        let peer = conn.peer();

        queue.add(conn).unwrap_or_else(|_| panic!("queue full"));
        assert_eq!(queue.attempts_for(peer), 1);

        let taken = queue.get().expect("eligible connection");
        assert_eq!(queue.attempts_for(peer), 0);
        drop(taken);
    }

    #[tokio::test]
    async fn test_clear_drops_connections_and_counters() {
        let queue = queue(4);
        let (conn, mut client) = test_conn().await;
        let peer = conn.peer();

        queue.add(conn).unwrap_or_else(|_| panic!("queue full"));
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.attempts_for(peer), 0);

        // dropped from the queue means the socket is closed
        use tokio::io::AsyncReadExt;
        let mut buffer = [0u8; 8];
        let read = client.read(&mut buffer).await.unwrap();
        assert_eq!(read, 0);
    }
}
