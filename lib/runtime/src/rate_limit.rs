//! Sliding one-minute rate limiter for public-slug triggers, keyed on
//! `(slug, sha256(ip)[:16])` so the server never retains raw caller IPs.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: usize,
    pub retry_after_ms: u64,
}

/// Hashes a caller IP down to the 16-character hex prefix the distilled
/// spec's rate-limit key uses.
#[must_use]
pub fn hash_ip(ip: &str) -> String {
    let digest = Sha256::digest(ip.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

/// Append-only per-key hit log, pruned of expired entries on each check.
#[derive(Default)]
pub struct RateLimiter {
    hits: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and records a hit for `(slug, ip_hash)` against `limit`
    /// (defaulting to 10/minute when the workflow doesn't override it).
    pub fn check(&self, slug: &str, ip_hash: &str, limit: Option<usize>) -> RateLimitDecision {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        let key = format!("{slug}:{ip_hash}");
        let now = Instant::now();

        let mut entry = self.hits.entry(key).or_default();
        entry.retain(|hit| now.duration_since(*hit) < WINDOW);

        if entry.len() >= limit {
            let oldest = entry.first().copied().unwrap_or(now);
            let retry_after = WINDOW.saturating_sub(now.duration_since(oldest));
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            };
        }

        entry.push(now);
        RateLimitDecision {
            allowed: true,
            remaining: limit - entry.len(),
            retry_after_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("demo", "abc", Some(3)).allowed);
        }
        let decision = limiter.check("demo", "abc", Some(3));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn different_keys_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("demo", "aaa", Some(3)).allowed);
        }
        assert!(limiter.check("demo", "bbb", Some(3)).allowed);
    }

    #[test]
    fn hash_ip_is_stable_and_sixteen_chars() {
        let a = hash_ip("203.0.113.7");
        let b = hash_ip("203.0.113.7");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
