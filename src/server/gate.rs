//! Acceptor and dispatcher
//!
//! The gate owns the listener and the background tasks: the accept
//! loop admits connections into the worker pool, spilling into the
//! back-pressure queue when the pool is full; the drainer re-offers
//! queued connections on a fixed tick; the sweeper trims expired
//! nonces. One watch channel coordinates shutdown across all three.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{ConfigError, Settings};
use crate::metrics::GateMetrics;
use crate::quotes::QuoteStore;
use crate::QUEUE_DRAIN_INTERVAL;

use super::conn::Connection;
use super::pool::WorkerPool;
use super::queue::BackoffQueue;
use super::session::SessionEngine;
use super::{MSG_BUSY, MSG_QUEUED};

/// Errors that stop the gate before it serves
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

/// Shared admission state for the accept loop and the drainer
struct Dispatcher {
    pool: WorkerPool,
    queue: BackoffQueue,
    metrics: Arc<GateMetrics>,
    write_timeout: Duration,
}

impl Dispatcher {
    /// Admit one accepted connection: pool first, queue second, busy
    /// line last
    async fn dispatch(&self, conn: Connection) {
        let conn = match self.pool.submit(conn) {
            Ok(()) => return,
            Err(conn) => conn,
        };

        if self.queue.is_full() {
            self.refuse(conn).await;
            return;
        }

        // the notice goes out before insertion; the accept loop is the
        // only adder, so the fullness check above holds
        let mut conn = conn;
        if conn.write_line(MSG_QUEUED, self.write_timeout).await.is_err() {
            return;
        }
        if let Err(conn) = self.queue.add(conn) {
            self.refuse(conn).await;
            return;
        }
        self.metrics
            .backoff_queue_depth
            .store(self.queue.len() as u64, Ordering::Relaxed);
    }

    async fn refuse(&self, mut conn: Connection) {
        self.metrics.queue_rejections.fetch_add(1, Ordering::Relaxed);
        debug!(conn_id = conn.id(), peer = %conn.peer(), "refusing connection, pool and queue full");
        let _ = conn.write_line(MSG_BUSY, self.write_timeout).await;
    }

    /// Move at most one eligible queued connection back into the pool;
    /// a connection the pool still cannot take is dropped, never
    /// re-queued
    fn drain_once(&self) {
        if let Some(conn) = self.queue.get() {
            if let Err(conn) = self.pool.submit(conn) {
                debug!(conn_id = conn.id(), "dropping queued connection, pool still full");
                drop(conn);
            }
            self.metrics
                .backoff_queue_depth
                .store(self.queue.len() as u64, Ordering::Relaxed);
        }
    }
}

/// The running server: listener, pool, queue, and background tasks
pub struct Gate {
    local_addr: SocketAddr,
    engine: Arc<SessionEngine>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<GateMetrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Gate {
    /// Validate settings, bind the listener, and start serving
    pub async fn start(settings: Settings, quotes: Arc<QuoteStore>) -> Result<Self, GateError> {
        settings.validate()?;

        let addr = settings.bind_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|source| GateError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| GateError::Bind {
            addr,
            source,
        })?;

        let metrics = Arc::new(GateMetrics::new());
        let engine = Arc::new(SessionEngine::new(
            &settings,
            quotes,
            Arc::clone(&metrics),
        ));
        let dispatcher = Arc::new(Dispatcher {
            pool: WorkerPool::new(
                settings.worker_pool_size,
                engine.clone(),
                Arc::clone(&metrics),
            ),
            queue: BackoffQueue::new(
                settings.queue_size,
                settings.base_backoff(),
                settings.max_backoff(),
            ),
            metrics: Arc::clone(&metrics),
            write_timeout: settings.write_timeout(),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(accept_loop(
            listener,
            Arc::clone(&dispatcher),
            Arc::clone(&metrics),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(drain_loop(
            Arc::clone(&dispatcher),
            shutdown_rx.clone(),
        )));
        tasks.push(tokio::spawn(sweep_loop(
            Arc::clone(&engine),
            settings.nonce_window(),
            shutdown_rx,
        )));

        info!(%local_addr, difficulty = settings.challenge_difficulty, workers = settings.worker_pool_size, "gate started");

        Ok(Self {
            local_addr,
            engine,
            dispatcher,
            metrics,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(tasks),
            stopped: AtomicBool::new(false),
        })
    }

    /// Bound listener address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close queued connections, drain the pool
    ///
    /// Idempotent; in-flight sessions finish (or time out) before
    /// this returns.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("gate shutting down");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(err) = task.await {
                error!("gate task failed during shutdown: {err}");
            }
        }

        self.dispatcher.queue.clear();
        self.dispatcher.pool.shutdown().await;

        let snapshot = self.metrics.snapshot();
        info!(
            connections = snapshot.connections_total,
            served = snapshot.proofs_verified,
            rejected_proofs = snapshot.verification_failures,
            replays = snapshot.replays_rejected,
            rate_limited = snapshot.rate_limit_hits,
            "gate stopped"
        );
    }

    /// Metrics snapshot for inspection
    pub fn metrics_snapshot(&self) -> crate::metrics::GateMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Connection slots currently held by sessions
    pub fn active_connections(&self) -> usize {
        self.engine.active_connections()
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<GateMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                    let conn = Connection::new(stream, peer);
                    debug!(conn_id = conn.id(), %peer, "connection accepted");
                    dispatcher.dispatch(conn).await;
                }
                Err(err) => {
                    error!("accept error: {err}");
                }
            }
        }
    }
    debug!("accept loop stopped");
    // listener drops here: no further connections are accepted
}

async fn drain_loop(dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(QUEUE_DRAIN_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => dispatcher.drain_once(),
        }
    }
    debug!("queue drainer stopped");
}

async fn sweep_loop(
    engine: Arc<SessionEngine>,
    window: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(window.max(Duration::from_secs(1)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first interval tick fires immediately; skip it
    tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => engine.sweep_nonces(),
        }
    }
    debug!("nonce sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConfig, ClientError, QuoteClient};
    use crate::server::MSG_RATE_LIMIT;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.host = "127.0.0.1".to_string();
        settings.port = 0;
        settings.challenge_difficulty = 4;
        settings.read_timeout_ms = 2_000;
        settings.write_timeout_ms = 2_000;
        settings
    }

    fn quotes(list: &[&str]) -> Arc<QuoteStore> {
        Arc::new(QuoteStore::from_list(list.iter().map(|q| q.to_string()).collect()).unwrap())
    }

    async fn read_line(reader: &mut BufReader<&mut TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn test_end_to_end_happy_path() {
        let gate = Gate::start(test_settings(), quotes(&["Hello"])).await.unwrap();

        let client = QuoteClient::new(ClientConfig {
            addr: gate.local_addr().to_string(),
            timeout: Duration::from_secs(5),
        });
        let quote = client.fetch().await.unwrap();
        assert_eq!(quote, "Hello");

        let snapshot = gate.metrics_snapshot();
        assert_eq!(snapshot.proofs_verified, 1);
        gate.shutdown().await;
    }

    #[tokio::test]
    async fn test_rate_limited_client_sees_refusal_line() {
        let mut settings = test_settings();
        settings.rate_limit = 1.0;
        settings.burst_limit = 1;
        let gate = Gate::start(settings, quotes(&["Hello"])).await.unwrap();

        let config = ClientConfig {
            addr: gate.local_addr().to_string(),
            timeout: Duration::from_secs(5),
        };
        let first = QuoteClient::new(config.clone()).fetch().await;
        assert!(first.is_ok());

        let second = QuoteClient::new(config).fetch().await;
        match second {
            Err(ClientError::Refused(line)) => assert_eq!(line, MSG_RATE_LIMIT),
            other => panic!("expected rate-limit refusal, got {other:?}"),
        }

        gate.shutdown().await;
    }

    #[tokio::test]
    async fn test_saturation_queues_then_refuses() {
        let mut settings = test_settings();
        settings.worker_pool_size = 1;
        settings.queue_size = 1;
        let gate = Gate::start(settings, quotes(&["Hello"])).await.unwrap();
        let addr = gate.local_addr();

        // first connection occupies the lone worker (challenge read,
        // nonce withheld); second parks in the pool channel
        let mut holder = TcpStream::connect(addr).await.unwrap();
        let mut holder_reader = BufReader::new(&mut holder);
        let _challenge = read_line(&mut holder_reader).await;

        let _parked = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // third lands in the backoff queue; fourth finds pool and
        // queue both full
        let mut queued = TcpStream::connect(addr).await.unwrap();
        let mut queued_reader = BufReader::new(&mut queued);
        assert_eq!(read_line(&mut queued_reader).await, MSG_QUEUED);

        let mut refused = TcpStream::connect(addr).await.unwrap();
        let mut refused_reader = BufReader::new(&mut refused);
        assert_eq!(read_line(&mut refused_reader).await, MSG_BUSY);

        gate.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_lets_in_flight_session_finish() {
        let gate = Gate::start(test_settings(), quotes(&["Hello"])).await.unwrap();
        let addr = gate.local_addr();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut reader = BufReader::new(&mut client);
        let challenge_line = read_line(&mut reader).await;
        let challenge = crate::pow::Challenge::parse(&challenge_line).unwrap();
        let nonce = crate::pow::solve(&challenge);

        // shutdown races the nonce we are about to send; the session
        // already owns its socket and must be allowed to answer
        let gate = Arc::new(gate);
        let shutdown = tokio::spawn({
            let gate = Arc::clone(&gate);
            async move { gate.shutdown().await }
        });

        reader
            .get_mut()
            .write_all(format!("{nonce}\n").as_bytes())
            .await
            .unwrap();
        assert_eq!(read_line(&mut reader).await, "Hello");

        shutdown.await.unwrap();

        // the listener is gone: new connections are refused outright
        assert!(TcpStream::connect(gate.local_addr()).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let gate = Gate::start(test_settings(), quotes(&["Hello"])).await.unwrap();
        gate.shutdown().await;
        gate.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_settings_refused_before_bind() {
        let mut settings = test_settings();
        settings.worker_pool_size = 0;
        let result = Gate::start(settings, quotes(&["Hello"])).await;
        assert!(matches!(result, Err(GateError::Config(_))));
    }
}
