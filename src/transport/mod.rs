//! Request pacing for remote fetch clients.

pub mod rate_limiter;

pub use rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterStats};
