//! Brute-force challenge solver
//!
//! The work the server prices connections in: walking nonces from
//! zero until the solution hash clears the difficulty. Lives server
//! side for the `solve`/`fetch` commands, the benchmark, and tests.

use std::time::{Duration, Instant};

use super::challenge::Challenge;

/// Find the smallest non-negative nonce solving `challenge`.
///
/// Runs until a solution is found; intractable difficulties will spin
/// forever. Callers with a budget should use [`solve_bounded`].
pub fn solve(challenge: &Challenge) -> i64 {
    let mut nonce = 0i64;
    loop {
        if challenge.verify(nonce) {
            return nonce;
        }
        nonce += 1;
    }
}

/// Like [`solve`], but gives up after `max_attempts` nonces.
pub fn solve_bounded(challenge: &Challenge, max_attempts: u64) -> Option<i64> {
    let mut nonce = 0i64;
    for _ in 0..max_attempts {
        if challenge.verify(nonce) {
            return Some(nonce);
        }
        nonce += 1;
    }
    None
}

/// Measure raw solution-hash throughput over `duration`.
///
/// Returns hashes per second. Used by the `bench` command to estimate
/// expected solve times per difficulty on this hardware.
pub fn hash_rate(duration: Duration) -> u64 {
    let challenge = Challenge::new("benchmark", u32::MAX);

    let start = Instant::now();
    let mut hashes = 0u64;
    let mut nonce = 0i64;
    let mut sink = 0u64;

    while start.elapsed() < duration {
        sink = sink.wrapping_add(challenge.solution_hash(nonce)[0] as u64);
        hashes += 1;
        nonce += 1;
    }
    std::hint::black_box(sink);

    let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
    (hashes as f64 / elapsed) as u64
}
