//! Token-bucket admission control for outbound API calls
//!
//! The bucket holds at most `capacity` tokens and refills continuously at
//! `refill_per_second`. Refill is computed lazily from the elapsed time on
//! every admission check, so no background task is needed. The bucket state is
//! the only mutable state shared between concurrent streams.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use crate::config::RateLimitSettings;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

enum Admission {
    Granted,
    Wait(Duration),
    Never,
}

/// Token bucket shared by every request a connector makes
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket.
    ///
    /// A `refill_per_second` of zero is accepted here and makes `acquire`
    /// wait forever once the initial tokens are spent; configuration
    /// validation rejects it for connectors.
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            refill_per_second: refill_per_second.max(0.0),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(settings.burst_capacity, settings.requests_per_second)
    }

    /// Wait until a token is available, then consume it.
    ///
    /// Only the calling task is suspended. Never fails.
    pub async fn acquire(&self) {
        loop {
            match self.admit() {
                Admission::Granted => return,
                Admission::Wait(delay) => {
                    trace!(delay_ms = delay.as_millis() as u64, "Rate limit reached, waiting for token");
                    tokio::time::sleep(delay).await;
                },
                Admission::Never => {
                    trace!("Rate limiter has no refill, waiting indefinitely");
                    std::future::pending::<()>().await;
                },
            }
        }
    }

    /// Consume a token if one is available right now
    pub fn try_acquire(&self) -> bool {
        matches!(self.admit(), Admission::Granted)
    }

    /// Tokens currently in the bucket (after refill)
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket);
        bucket.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    fn admit(&self) -> Admission {
        let mut bucket = self.lock();
        self.refill(&mut bucket);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Admission::Granted;
        }
        if self.refill_per_second <= 0.0 {
            return Admission::Never;
        }

        let deficit = 1.0 - bucket.tokens;
        Admission::Wait(Duration::from_secs_f64(deficit / self.refill_per_second))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_without_waiting() {
        let limiter = RateLimiter::new(5, 2.0);
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_past_capacity_waits_for_refill() {
        let limiter = RateLimiter::new(3, 4.0);
        for _ in 0..3 {
            limiter.acquire().await;
        }

        let start = Instant::now();
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = RateLimiter::new(2, 100.0);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(limiter.available() <= 2.0);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_share_budget() {
        let limiter = Arc::new(RateLimiter::new(2, 1.0));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Two from the burst, two more at one token per second
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_refill_blocks_once_exhausted() {
        let limiter = RateLimiter::new(1, 0.0);
        limiter.acquire().await;

        let blocked = tokio::time::timeout(Duration::from_secs(3600), limiter.acquire()).await;
        assert!(blocked.is_err());
    }
}
