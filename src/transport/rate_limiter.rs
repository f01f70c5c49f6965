//! Token bucket pacing for calls to the remote support API.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate limiter settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub requests_per_second: f64,
    /// Tokens available after an idle period.
    pub burst: u32,
    /// Pause applied when the server rate-limits without a `Retry-After`.
    pub default_backoff_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 10,
            default_backoff_ms: 60_000,
        }
    }
}

/// Counters reported by [`RateLimiter::stats`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Tokens handed out.
    pub total_requests: u64,
    /// Requests reported as successful.
    pub successful_requests: u64,
    /// Rate-limit responses reported.
    pub rate_limits_hit: u64,
    /// Time spent waiting for tokens, in milliseconds.
    pub total_wait_ms: u64,
    /// Configured sustained rate.
    pub requests_per_second: f64,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    paused_until: Option<Instant>,
    stats: RateLimiterStats,
}

/// Shared token bucket; clone it behind an `Arc`.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    default_backoff: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let rate = if config.requests_per_second > 0.0 {
            config.requests_per_second
        } else {
            RateLimitConfig::default().requests_per_second
        };
        let burst = f64::from(config.burst.max(1));
        Self {
            rate,
            burst,
            default_backoff: Duration::from_millis(config.default_backoff_ms),
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refilled_at: Instant::now(),
                paused_until: None,
                stats: RateLimiterStats {
                    requests_per_second: rate,
                    ..RateLimiterStats::default()
                },
            }),
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        let started = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.lock();
                let now = Instant::now();
                self.refill(&mut bucket, now);

                match bucket.paused_until {
                    Some(until) if until > now => until - now,
                    _ => {
                        bucket.paused_until = None;
                        if bucket.tokens >= 1.0 {
                            bucket.tokens -= 1.0;
                            bucket.stats.total_requests += 1;
                            let waited = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                            bucket.stats.total_wait_ms = bucket.stats.total_wait_ms.saturating_add(waited);
                            return;
                        }
                        Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
                    }
                }
            };
            debug!(?wait, "Rate limiting: waiting for a token");
            tokio::time::sleep(wait).await;
        }
    }

    /// Pause the bucket after a rate-limit response.
    pub fn report_rate_limited(&self, retry_after: Option<Duration>) {
        let pause = retry_after.unwrap_or(self.default_backoff);
        let mut bucket = self.lock();
        bucket.tokens = 0.0;
        bucket.paused_until = Some(Instant::now() + pause);
        bucket.stats.rate_limits_hit += 1;
        warn!(?pause, explicit = retry_after.is_some(), "Rate limit hit, pausing requests");
    }

    /// Record a successful request and lift any pause.
    pub fn report_success(&self) {
        let mut bucket = self.lock();
        bucket.paused_until = None;
        bucket.stats.successful_requests += 1;
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        self.lock().stats.clone()
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = elapsed.mul_add(self.rate, bucket.tokens).min(self.burst);
        bucket.refilled_at = now;
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
