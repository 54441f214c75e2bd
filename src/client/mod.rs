//! Line-protocol client
//!
//! Connects, reads the challenge line, grinds out the nonce on a
//! blocking thread, submits it, and classifies the reply: a quote on
//! success, one of the server's refusal lines otherwise. Drives the
//! `fetch` command and the end-to-end tests.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::pow::{solve, Challenge, ChallengeError};
use crate::server::{
    MSG_BAD_PROOF, MSG_BUSY, MSG_CONN_LIMIT, MSG_QUEUED, MSG_RATE_LIMIT, MSG_REPLAY,
};

/// Lines the server sends instead of a quote
const REFUSAL_LINES: [&str; 5] = [
    MSG_CONN_LIMIT,
    MSG_RATE_LIMIT,
    MSG_BAD_PROOF,
    MSG_REPLAY,
    MSG_BUSY,
];

/// Client connection parameters
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `host:port`
    pub addr: String,
    /// Deadline applied to connect and to each read/write
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("127.0.0.1:{}", crate::DEFAULT_PORT),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Errors from one fetch attempt
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("server closed the connection without a reply")]
    Closed,

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("solver task failed")]
    Solver,

    #[error("server refused: {0}")]
    Refused(String),
}

/// One-shot quote fetcher
pub struct QuoteClient {
    config: ClientConfig,
}

impl QuoteClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Run the full handshake and return the quote
    pub async fn fetch(&self) -> Result<String, ClientError> {
        let stream = timeout(self.config.timeout, TcpStream::connect(&self.config.addr))
            .await
            .map_err(|_| ClientError::Timeout)??;

        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut first = self.read_line(&mut reader).await?;
        if first == MSG_QUEUED {
            // parked in the server's backoff queue; the challenge
            // follows once a worker frees up
            first = self.read_line(&mut reader).await?;
        }
        if REFUSAL_LINES.contains(&first.as_str()) {
            return Err(ClientError::Refused(first));
        }

        let challenge = Challenge::parse(&first)?;
        let nonce = tokio::task::spawn_blocking(move || solve(&challenge))
            .await
            .map_err(|_| ClientError::Solver)?;

        timeout(
            self.config.timeout,
            writer.write_all(format!("{nonce}\n").as_bytes()),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        let reply = self.read_line(&mut reader).await?;
        if REFUSAL_LINES.contains(&reply.as_str()) {
            return Err(ClientError::Refused(reply));
        }
        Ok(reply)
    }

    async fn read_line<R>(&self, reader: &mut BufReader<R>) -> Result<String, ClientError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut line = String::new();
        let read = timeout(self.config.timeout, reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout)??;
        if read == 0 {
            return Err(ClientError::Closed);
        }
        Ok(line.trim_end().to_string())
    }
}
