//! Server settings
//!
//! Every tunable of the admission pipeline, deserialized from a YAML
//! file, overridable from `POWGATE_*` environment variables, and
//! validated before the gate starts. Durations are denominated in the
//! unit their key names (`*_ms`, `*_secs`).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{
    DEFAULT_BASE_BACKOFF, DEFAULT_BURST_LIMIT, DEFAULT_DIFFICULTY_BITS, DEFAULT_HOST,
    DEFAULT_MAX_BACKOFF, DEFAULT_MAX_CONNECTIONS, DEFAULT_NONCE_WINDOW, DEFAULT_PORT,
    DEFAULT_QUEUE_SIZE, DEFAULT_RATE_LIMIT, DEFAULT_READ_TIMEOUT, DEFAULT_WORKER_POOL_SIZE,
    DEFAULT_WRITE_TIMEOUT, MAX_DIFFICULTY_BITS,
};

/// Errors from loading or validating settings
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Gate settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Challenge difficulty in leading zero bits
    pub challenge_difficulty: u32,
    /// Per-read deadline in milliseconds
    pub read_timeout_ms: u64,
    /// Per-write deadline in milliseconds
    pub write_timeout_ms: u64,
    /// Token-bucket refill rate, tokens per second
    pub rate_limit: f64,
    /// Token-bucket burst capacity
    pub burst_limit: u64,
    /// Cap on concurrently admitted connections
    pub max_connections: usize,
    /// Parallel session workers
    pub worker_pool_size: usize,
    /// Back-pressure queue capacity
    pub queue_size: usize,
    /// Exponential backoff base in milliseconds
    pub base_backoff_ms: u64,
    /// Exponential backoff ceiling in milliseconds
    pub max_backoff_ms: u64,
    /// Replay-suppression window in seconds
    pub nonce_window_secs: u64,
    /// Optional YAML quotes file; built-in list when unset
    pub quotes_file: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            challenge_difficulty: DEFAULT_DIFFICULTY_BITS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            rate_limit: DEFAULT_RATE_LIMIT,
            burst_limit: DEFAULT_BURST_LIMIT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            queue_size: DEFAULT_QUEUE_SIZE,
            base_backoff_ms: DEFAULT_BASE_BACKOFF.as_millis() as u64,
            max_backoff_ms: DEFAULT_MAX_BACKOFF.as_millis() as u64,
            nonce_window_secs: DEFAULT_NONCE_WINDOW.as_secs(),
            quotes_file: None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&raw)?;
        Ok(settings)
    }

    /// Apply `POWGATE_*` environment overrides on top of the current
    /// values; unparsable values are ignored
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("POWGATE_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }
        env_parse("POWGATE_PORT", &mut self.port);
        env_parse("POWGATE_DIFFICULTY", &mut self.challenge_difficulty);
        env_parse("POWGATE_READ_TIMEOUT_MS", &mut self.read_timeout_ms);
        env_parse("POWGATE_WRITE_TIMEOUT_MS", &mut self.write_timeout_ms);
        env_parse("POWGATE_RATE_LIMIT", &mut self.rate_limit);
        env_parse("POWGATE_BURST_LIMIT", &mut self.burst_limit);
        env_parse("POWGATE_MAX_CONNECTIONS", &mut self.max_connections);
        env_parse("POWGATE_WORKER_POOL_SIZE", &mut self.worker_pool_size);
        env_parse("POWGATE_QUEUE_SIZE", &mut self.queue_size);
        env_parse("POWGATE_BASE_BACKOFF_MS", &mut self.base_backoff_ms);
        env_parse("POWGATE_MAX_BACKOFF_MS", &mut self.max_backoff_ms);
        env_parse("POWGATE_NONCE_WINDOW_SECS", &mut self.nonce_window_secs);
        if let Ok(path) = std::env::var("POWGATE_QUOTES_FILE") {
            if !path.is_empty() {
                self.quotes_file = Some(path);
            }
        }
    }

    /// Reject settings the gate cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.rate_limit <= 0.0 {
            return Err(ConfigError::Invalid(
                "rate_limit must be positive".to_string(),
            ));
        }
        if self.challenge_difficulty > MAX_DIFFICULTY_BITS {
            return Err(ConfigError::Invalid(format!(
                "challenge_difficulty {} exceeds {} bits",
                self.challenge_difficulty, MAX_DIFFICULTY_BITS
            )));
        }
        Ok(())
    }

    /// `host:port` for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn nonce_window(&self) -> Duration {
        Duration::from_secs(self.nonce_window_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        if let Ok(value) = raw.parse() {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let settings = Settings::default();

        assert_eq!(settings.bind_addr(), "0.0.0.0:8080");
        assert_eq!(settings.challenge_difficulty, 16);
        assert_eq!(settings.read_timeout(), Duration::from_secs(30));
        assert_eq!(settings.rate_limit, 10.0);
        assert_eq!(settings.burst_limit, 20);
        assert_eq!(settings.max_connections, 100);
        assert_eq!(settings.worker_pool_size, 10);
        assert_eq!(settings.queue_size, 50);
        assert_eq!(settings.base_backoff(), Duration::from_millis(100));
        assert_eq!(settings.max_backoff(), Duration::from_secs(5));
        assert_eq!(settings.nonce_window(), Duration::from_secs(300));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let settings: Settings =
            serde_yaml::from_str("port: 9090\nchallenge_difficulty: 20\n").unwrap();

        assert_eq!(settings.port, 9090);
        assert_eq!(settings.challenge_difficulty, 20);
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.worker_pool_size, DEFAULT_WORKER_POOL_SIZE);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("POWGATE_PORT", "7070");
        std::env::set_var("POWGATE_DIFFICULTY", "not-a-number");

        let mut settings = Settings::default();
        settings.apply_env_overrides();

        assert_eq!(settings.port, 7070);
        // unparsable override is ignored
        assert_eq!(settings.challenge_difficulty, DEFAULT_DIFFICULTY_BITS);

        std::env::remove_var("POWGATE_PORT");
        std::env::remove_var("POWGATE_DIFFICULTY");
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let mut settings = Settings::default();
        settings.worker_pool_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.rate_limit = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.challenge_difficulty = 300;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join("powgate_settings_test.yml");
        std::fs::write(&path, "host: \"127.0.0.1\"\nqueue_size: 5\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.queue_size, 5);

        std::fs::remove_file(&path).ok();
    }
}
