//! Hash puzzles issued to connecting clients
//!
//! A challenge binds an opaque data string to a difficulty and an
//! issuance timestamp. The client searches for a nonce whose SHA-256
//! over the canonical concatenation clears the required number of
//! leading zero bits; the server re-computes one hash to verify.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// One puzzle instance
///
/// Created per connection session and never stored beyond it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Opaque payload the proof is bound to; must not contain `|`
    pub data: String,
    /// Required count of leading zero bits in the solution hash
    pub difficulty: u32,
    /// Issuance time, seconds since the Unix epoch
    pub timestamp: i64,
}

/// Errors from decoding a challenge line
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChallengeError {
    #[error("challenge line must have exactly three '|' separated fields")]
    Format,

    #[error("invalid difficulty field: {0:?}")]
    Difficulty(String),

    #[error("invalid timestamp field: {0:?}")]
    Timestamp(String),
}

impl Challenge {
    /// Issue a new challenge over `data`, stamped with the current wall clock
    pub fn new(data: impl Into<String>, difficulty: u32) -> Self {
        Self {
            data: data.into(),
            difficulty,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Canonical wire encoding: `<data>|<difficulty>|<timestamp>`
    pub fn wire_format(&self) -> String {
        format!("{}|{}|{}", self.data, self.difficulty, self.timestamp)
    }

    /// Decode a wire-encoded challenge line
    ///
    /// Rejects anything that does not split into exactly three fields,
    /// and any non-integer difficulty or timestamp.
    pub fn parse(line: &str) -> Result<Self, ChallengeError> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() != 3 {
            return Err(ChallengeError::Format);
        }

        let difficulty = parts[1]
            .parse::<u32>()
            .map_err(|_| ChallengeError::Difficulty(parts[1].to_string()))?;
        let timestamp = parts[2]
            .parse::<i64>()
            .map_err(|_| ChallengeError::Timestamp(parts[2].to_string()))?;

        Ok(Self {
            data: parts[0].to_string(),
            difficulty,
            timestamp,
        })
    }

    /// SHA-256 over `data ‖ timestamp ‖ nonce`, both integers in
    /// canonical decimal ASCII with no separators
    pub fn solution_hash(&self, nonce: i64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.data.as_bytes());
        hasher.update(self.timestamp.to_string().as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.finalize().into()
    }

    /// Check whether `nonce` solves this challenge
    ///
    /// Negative nonces never verify. Difficulty 0 accepts any
    /// non-negative nonce.
    pub fn verify(&self, nonce: i64) -> bool {
        if nonce < 0 {
            return false;
        }
        leading_zero_bits(&self.solution_hash(nonce)) >= self.difficulty
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_format())
    }
}

/// Count leading zero bits of a digest, most significant byte first
pub fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for &byte in digest {
        if byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}
