//! Shared request throttle.
//!
//! One [`RequestThrottle`] is shared by every worker that talks to the network.
//! It combines a token bucket (request credits per minute) with a small random
//! delay before each request so bursts do not line up.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

/// Throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Request credits per minute. 0 disables the bucket.
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    /// Lower bound of the random pre-request delay, in milliseconds.
    #[serde(default = "default_jitter_min")]
    pub jitter_min_ms: u64,

    /// Upper bound of the random pre-request delay, in milliseconds.
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,
}

fn default_rpm() -> u32 {
    300
}

fn default_jitter_min() -> u64 {
    100
}

fn default_jitter_max() -> u64 {
    500
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            jitter_min_ms: default_jitter_min(),
            jitter_max_ms: default_jitter_max(),
        }
    }
}

/// Token bucket refilled at a constant rate.
///
/// The bucket starts full, allowing a burst up to its capacity.
pub struct TokenBucket {
    /// Max tokens (= requests per minute).
    capacity: f32,
    tokens: f32,
    /// Tokens added per second.
    refill_rate: f32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_minute: u32) -> Self {
        let capacity = requests_per_minute.max(1) as f32;
        Self {
            capacity,
            tokens: capacity,
            refill_rate: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Take one token, or return how long to wait until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let tokens_needed = 1.0 - self.tokens;
            Err(Duration::from_secs_f32(tokens_needed / self.refill_rate))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f32();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Request credits shared across workers.
#[derive(Clone)]
pub struct RequestThrottle {
    bucket: Option<Arc<Mutex<TokenBucket>>>,
    jitter_min_ms: u64,
    jitter_max_ms: u64,
}

impl RequestThrottle {
    pub fn new(config: &ThrottleConfig) -> Self {
        let bucket = (config.requests_per_minute > 0)
            .then(|| Arc::new(Mutex::new(TokenBucket::new(config.requests_per_minute))));
        Self {
            bucket,
            jitter_min_ms: config.jitter_min_ms.min(config.jitter_max_ms),
            jitter_max_ms: config.jitter_max_ms,
        }
    }

    /// A throttle that never waits.
    pub fn unlimited() -> Self {
        Self {
            bucket: None,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
        }
    }

    /// Wait for a request credit, then for the random pre-request delay.
    pub async fn acquire(&self) {
        if let Some(bucket) = &self.bucket {
            loop {
                let wait = {
                    let mut bucket = bucket.lock().await;
                    match bucket.try_acquire() {
                        Ok(()) => break,
                        Err(wait) => wait,
                    }
                };
                debug!(wait_ms = wait.as_millis() as u64, "Request credits exhausted, waiting");
                sleep(wait).await;
            }
        }

        let jitter = self.jitter();
        if !jitter.is_zero() {
            sleep(jitter).await;
        }
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::rng().random_range(self.jitter_min_ms..=self.jitter_max_ms);
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_drains_and_reports_wait() {
        let mut bucket = TokenBucket::new(10);
        for _ in 0..10 {
            assert!(bucket.try_acquire().is_ok());
        }
        let wait = bucket.try_acquire().unwrap_err();
        // At 10 rpm, 1 token takes 6 seconds to refill
        assert!(wait.as_secs() <= 6);
        assert!(wait.as_millis() > 0);
    }

    #[tokio::test]
    async fn test_token_bucket_refill() {
        let mut bucket = TokenBucket::new(60);
        for _ in 0..60 {
            bucket.try_acquire().unwrap();
        }
        assert!(bucket.try_acquire().is_err());

        // One token per second: after 100ms most of a second is still owed.
        sleep(Duration::from_millis(100)).await;
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::from_millis(500));
        assert!(wait < Duration::from_millis(950));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let throttle = RequestThrottle::new(&ThrottleConfig {
            requests_per_minute: 0,
            jitter_min_ms: 5,
            jitter_max_ms: 9,
        });
        for _ in 0..50 {
            let j = throttle.jitter().as_millis() as u64;
            assert!((5..=9).contains(&j));
        }
    }

    #[tokio::test]
    async fn test_unlimited_throttle_does_not_wait() {
        let throttle = RequestThrottle::unlimited();
        let started = Instant::now();
        for _ in 0..100 {
            throttle.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_shared_bucket_across_clones() {
        let throttle = RequestThrottle::new(&ThrottleConfig {
            requests_per_minute: 3,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
        });
        let other = throttle.clone();
        throttle.acquire().await;
        other.acquire().await;
        throttle.acquire().await;

        let bucket = other.bucket.as_ref().unwrap();
        assert!(bucket.lock().await.try_acquire().is_err());
    }
}
