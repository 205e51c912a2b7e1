//! Outbound fetch rate limiting for the key-set endpoint
//!
//! A sliding-window limiter shared by every concurrent authorization. It bounds
//! how often the authorizer may call the key-set endpoint in total, so a burst
//! of tokens with unknown key identifiers cannot turn into a burst of requests
//! against the identity provider.
//!
//! ```rust
//! use tokengate_auth::rate_limit::FetchRateLimiter;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let limiter = FetchRateLimiter::new(10, Duration::from_secs(60));
//!
//! match limiter.check().await {
//!     Ok(()) => { /* go fetch */ }
//!     Err(info) => println!("retry after {:?}", info.retry_after),
//! }
//! # });
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Sliding-window limiter over outbound key-set fetches
#[derive(Debug, Clone)]
pub struct FetchRateLimiter {
    limit: u32,
    window: Duration,
    enabled: bool,
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
}

/// Information about a rate limit violation
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Time until the oldest fetch leaves the window
    pub retry_after: Duration,
    /// Fetches currently counted in the window
    pub current_count: u32,
    /// Maximum allowed fetches per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl FetchRateLimiter {
    /// Allow at most `limit` fetches in any `window`
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            enabled: true,
            timestamps: Arc::new(Mutex::new(VecDeque::with_capacity(limit as usize))),
        }
    }

    /// Create a disabled limiter (for testing)
    pub fn disabled() -> Self {
        Self {
            limit: u32::MAX,
            window: Duration::from_secs(1),
            enabled: false,
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Take one slot from the budget
    ///
    /// Returns `Ok(())` if the fetch may proceed, `Err(RateLimitInfo)` otherwise.
    /// A successful check is recorded immediately, whether or not the fetch
    /// that follows succeeds.
    pub async fn check(&self) -> Result<(), RateLimitInfo> {
        if !self.enabled {
            return Ok(());
        }

        let now = Instant::now();
        let mut timestamps = self.timestamps.lock().await;

        // Drop fetches that have left the window
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        let current_count = timestamps.len() as u32;
        if current_count >= self.limit {
            let oldest = timestamps.front().copied().unwrap_or(now);
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));

            warn!(
                current_count,
                limit = self.limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Key-set fetch budget exhausted"
            );

            return Err(RateLimitInfo {
                retry_after,
                current_count,
                limit: self.limit,
                window: self.window,
            });
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Fetches currently counted in the window
    pub async fn usage(&self) -> u32 {
        let now = Instant::now();
        let timestamps = self.timestamps.lock().await;
        timestamps
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count() as u32
    }

    /// Forget all recorded fetches
    pub async fn reset(&self) {
        self.timestamps.lock().await.clear();
    }

    /// Configured budget per window
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Configured window
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl std::fmt::Display for RateLimitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} fetches in {:?}, retry after {:?}",
            self.current_count, self.limit, self.window, self.retry_after
        )
    }
}

impl std::error::Error for RateLimitInfo {}
