//! Metering module
//!
//! Provides usage ingestion and normalization:
//! - RateLimiter: token bucket shared by every provider call
//! - RateLimitedFetcher: paginated, retrying usage reads
//! - UsageNormalizer: rate vs cumulative quantities per window

pub mod fetcher;
pub mod limiter;
pub mod normalizer;

pub use fetcher::{RateLimitedFetcher, RetryPolicy, WindowFetch};
pub use limiter::RateLimiter;
pub use normalizer::{Normalized, PriorReadings, UsageNormalizer};
