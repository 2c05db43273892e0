//! Rate limiting for abuse prevention
//!
//! Fixed-window counters kept in process memory. Used to throttle license
//! activation attempts per device, which makes key guessing expensive.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Pre-configured rate limits for different operations
pub mod limits {
    use super::*;

    /// Activation attempts per device per hour
    pub fn activation_attempts(max_per_hour: u32) -> RateLimitConfig {
        RateLimitConfig::new(max_per_hour, 3600)
    }
}

/// Result of a rate limit check
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Current count in the window
    pub current: u32,
    /// Maximum allowed in the window
    pub limit: u32,
    /// Seconds until the window resets
    pub reset_in_secs: u64,
}

pub struct RateLimiter {
    buckets: DashMap<String, (u32, Instant)>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Count one request against `key` and report whether it is allowed
    pub fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let now = Instant::now();

        let mut entry = self.buckets.entry(key.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        // Reset if window expired
        if now.duration_since(*window_start) >= config.window {
            *count = 0;
            *window_start = now;
        }

        *count = count.saturating_add(1);
        let current = *count;
        let allowed = current <= config.max_requests;
        let elapsed = now.duration_since(*window_start);
        let reset_in_secs = config.window.as_secs().saturating_sub(elapsed.as_secs());

        RateLimitResult {
            allowed,
            current,
            limit: config.max_requests,
            reset_in_secs,
        }
    }

    /// Drop windows older than `max_age` (call periodically)
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets.retain(|_, (_, start)| now.duration_since(*start) < max_age);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
