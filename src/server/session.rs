//! Per-connection session state machine
//!
//! One worker runs one session: take a connection slot, spend a rate
//! token, issue the challenge, read the nonce, verify the proof,
//! check replay freshness, reply. The reply is only ever written
//! after both verification steps pass, and every failure path closes
//! the connection with at most one error line.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::WriteHalf;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::limiter::{ConnectionLimiter, NonceTracker, TokenBucket};
use crate::metrics::GateMetrics;
use crate::pow::Challenge;
use crate::quotes::QuoteStore;

use super::conn::Connection;
use super::pool::SessionHandler;
use super::{MSG_BAD_PROOF, MSG_CONN_LIMIT, MSG_RATE_LIMIT, MSG_REPLAY};

/// How a session ended; drives logging and counters
#[derive(Debug)]
enum SessionOutcome {
    Served,
    ConnLimited,
    RateLimited,
    BadProof,
    Replayed,
    Protocol(&'static str),
    Transport(std::io::Error),
}

/// Shared state behind every session
pub struct SessionEngine {
    difficulty: u32,
    read_timeout: Duration,
    write_timeout: Duration,
    rate_limiter: TokenBucket,
    conn_limiter: ConnectionLimiter,
    nonce_tracker: NonceTracker,
    quotes: Arc<QuoteStore>,
    metrics: Arc<GateMetrics>,
}

impl SessionEngine {
    pub fn new(settings: &Settings, quotes: Arc<QuoteStore>, metrics: Arc<GateMetrics>) -> Self {
        Self {
            difficulty: settings.challenge_difficulty,
            read_timeout: settings.read_timeout(),
            write_timeout: settings.write_timeout(),
            rate_limiter: TokenBucket::new(settings.rate_limit, settings.burst_limit),
            conn_limiter: ConnectionLimiter::new(settings.max_connections),
            nonce_tracker: NonceTracker::new(settings.nonce_window()),
            quotes,
            metrics,
        }
    }

    /// Drop expired nonces; called by the gate's periodic sweep task
    pub fn sweep_nonces(&self) {
        self.nonce_tracker.sweep();
    }

    /// Connection slots currently held
    pub fn active_connections(&self) -> usize {
        self.conn_limiter.count()
    }

    async fn run(&self, mut conn: Connection) {
        let started = Instant::now();
        let conn_id = conn.id();
        let peer = conn.peer();

        self.metrics
            .connections_active
            .fetch_add(1, Ordering::Relaxed);
        debug!(conn_id, %peer, "session started");

        let outcome = self.drive(&mut conn).await;
        match &outcome {
            SessionOutcome::Served => {
                info!(conn_id, %peer, elapsed_ms = started.elapsed().as_millis() as u64, "quote served")
            }
            SessionOutcome::ConnLimited => warn!(conn_id, %peer, "connection limit exceeded"),
            SessionOutcome::RateLimited => warn!(conn_id, %peer, "rate limit exceeded"),
            SessionOutcome::BadProof => warn!(conn_id, %peer, "invalid proof of work"),
            SessionOutcome::Replayed => warn!(conn_id, %peer, "replayed nonce rejected"),
            SessionOutcome::Protocol(reason) => debug!(conn_id, %peer, reason, "protocol error"),
            SessionOutcome::Transport(err) => debug!(conn_id, %peer, %err, "transport error"),
        }

        self.metrics
            .connections_active
            .fetch_sub(1, Ordering::Relaxed);
        self.metrics.record_session(started.elapsed());
        debug!(conn_id, %peer, "session closed");
        // conn drops here: the socket closes exactly once
    }

    async fn drive(&self, conn: &mut Connection) -> SessionOutcome {
        let _permit = match self.conn_limiter.acquire() {
            Some(permit) => permit,
            None => {
                self.metrics.conn_limit_hits.fetch_add(1, Ordering::Relaxed);
                let (_, mut writer) = conn.stream.split();
                let _ = self.write_line(&mut writer, MSG_CONN_LIMIT).await;
                return SessionOutcome::ConnLimited;
            }
        };

        if !self.rate_limiter.allow() {
            self.metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            let (_, mut writer) = conn.stream.split();
            let _ = self.write_line(&mut writer, MSG_RATE_LIMIT).await;
            return SessionOutcome::RateLimited;
        }

        let (reader, mut writer) = conn.stream.split();
        let mut reader = BufReader::new(reader);

        // the quote is the challenge payload: the proof binds to the
        // exact reply the client will receive
        let quote = self.quotes.random();
        let challenge = Challenge::new(quote.clone(), self.difficulty);
        self.metrics.challenges_issued.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.write_line(&mut writer, &challenge.wire_format()).await {
            return SessionOutcome::Transport(err);
        }

        let line = match self.read_nonce_line(&mut reader).await {
            Ok(line) => line,
            Err(err) => return SessionOutcome::Transport(err),
        };
        let nonce: i64 = match line.parse() {
            Ok(nonce) => nonce,
            Err(_) => return SessionOutcome::Protocol("nonce is not a decimal integer"),
        };

        if !challenge.verify(nonce) {
            self.metrics
                .verification_failures
                .fetch_add(1, Ordering::Relaxed);
            let _ = self.write_line(&mut writer, MSG_BAD_PROOF).await;
            return SessionOutcome::BadProof;
        }

        if !self.nonce_tracker.check_and_record(nonce as u64) {
            self.metrics.replays_rejected.fetch_add(1, Ordering::Relaxed);
            let _ = self.write_line(&mut writer, MSG_REPLAY).await;
            return SessionOutcome::Replayed;
        }

        self.metrics.proofs_verified.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.write_line(&mut writer, &quote).await {
            return SessionOutcome::Transport(err);
        }
        SessionOutcome::Served
    }

    /// Read until a non-empty trimmed line arrives, bounded overall
    /// by the read deadline; blank lines are skipped, not billed
    async fn read_nonce_line(
        &self,
        reader: &mut BufReader<tokio::net::tcp::ReadHalf<'_>>,
    ) -> std::io::Result<String> {
        let deadline = Instant::now() + self.read_timeout;
        let mut line = String::new();

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "read deadline exceeded")
                })?;

            line.clear();
            let read = tokio::time::timeout(remaining, reader.read_line(&mut line))
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "read deadline exceeded")
                })??;

            if read == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before a nonce arrived",
                ));
            }

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(trimmed.to_string());
            }
        }
    }

    async fn write_line(&self, writer: &mut WriteHalf<'_>, line: &str) -> std::io::Result<()> {
        let payload = format!("{line}\n");
        match tokio::time::timeout(self.write_timeout, writer.write_all(payload.as_bytes())).await
        {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            )),
        }
    }
}

impl SessionHandler for SessionEngine {
    fn handle(self: Arc<Self>, conn: Connection) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { self.run(conn).await })
    }
}
