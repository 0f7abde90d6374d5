//! Byte-rate throttling shared by concurrent part workers
//!
//! Token bucket refilled continuously at the configured rate and capped at one
//! second of burst. A request larger than the available tokens is admitted by
//! going into debt: the caller sleeps until the deficit would have refilled,
//! and later callers inherit the debt. Requests therefore never deadlock on
//! parts larger than the burst, and `N` bytes always take at least `N / rate`
//! seconds from a cold bucket.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct BucketState {
    /// Bytes per second; `None` disables throttling
    rate: Option<u64>,
    /// Available tokens, negative while in debt
    tokens: f64,
    last_refill: Instant,
    metrics: RateLimitMetrics,
}

impl BucketState {
    fn refill(&mut self, rate: u64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let cap = rate as f64;
        self.tokens = (self.tokens + elapsed.as_secs_f64() * cap).min(cap);
        self.last_refill = now;
    }
}

/// Rate limiting metrics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RateLimitMetrics {
    /// Bytes admitted through `acquire`
    pub bytes_acquired: u64,

    /// `acquire` calls that had to wait
    pub throttled_calls: u64,

    /// Total time callers were told to wait
    pub total_wait: Duration,
}

/// Token-bucket byte throttle
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter; `None` or `Some(0)` means unlimited
    pub fn new(bytes_per_sec: Option<u64>) -> Self {
        Self {
            state: Mutex::new(BucketState {
                rate: bytes_per_sec.filter(|&r| r > 0),
                tokens: 0.0,
                last_refill: Instant::now(),
                metrics: RateLimitMetrics::default(),
            }),
        }
    }

    /// Limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait until `bytes` may be moved
    pub async fn acquire(&self, bytes: u64) {
        if bytes == 0 {
            return;
        }

        let wait = {
            let mut state = self.state.lock().await;
            state.metrics.bytes_acquired = state.metrics.bytes_acquired.saturating_add(bytes);
            let Some(rate) = state.rate else {
                return;
            };

            state.refill(rate, Instant::now());
            state.tokens -= bytes as f64;

            if state.tokens >= 0.0 {
                return;
            }

            let wait = debt_wait(-state.tokens, rate);
            state.metrics.throttled_calls += 1;
            state.metrics.total_wait = state.metrics.total_wait.saturating_add(wait);
            wait
        };

        trace!(bytes, wait_ms = wait.as_millis() as u64, "rate limit wait");
        tokio::time::sleep(wait).await;
    }

    /// Change the rate mid-run; `None` or `Some(0)` disables throttling
    pub async fn set_rate(&self, bytes_per_sec: Option<u64>) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        if let Some(old) = state.rate {
            state.refill(old, now);
        }

        state.rate = bytes_per_sec.filter(|&r| r > 0);
        match state.rate {
            Some(rate) => state.tokens = state.tokens.min(rate as f64),
            None => state.tokens = 0.0,
        }
        state.last_refill = now;
    }

    /// Current rate, `None` when unlimited
    pub async fn rate(&self) -> Option<u64> {
        self.state.lock().await.rate
    }

    /// Snapshot of the metrics
    pub async fn metrics(&self) -> RateLimitMetrics {
        self.state.lock().await.metrics.clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Time to repay `debt` tokens at `rate`, saturating at [`Duration::MAX`]
fn debt_wait(debt: f64, rate: u64) -> Duration {
    Duration::try_from_secs_f64(debt / rate as f64).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_debt_wait_saturates() {
        assert_eq!(debt_wait(500.0, 1000), Duration::from_millis(500));
        assert_eq!(debt_wait(u64::MAX as f64 * 2.0, 1), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_debt_does_not_panic() {
        let limiter = RateLimiter::new(Some(1));
        let huge = u64::MAX / 2 + 1;
        for _ in 0..2 {
            let pending = tokio::time::timeout(Duration::from_secs(1), limiter.acquire(huge)).await;
            assert!(pending.is_err());
        }

        let metrics = limiter.metrics().await;
        assert_eq!(metrics.throttled_calls, 2);
        assert_eq!(metrics.bytes_acquired, u64::MAX);
        assert_eq!(metrics.total_wait, Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::new(Some(0));
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire(1 << 20).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.rate().await, None);

        let metrics = limiter.metrics().await;
        assert_eq!(metrics.bytes_acquired, 100 << 20);
        assert_eq!(metrics.throttled_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_bound_single_caller() {
        let limiter = RateLimiter::new(Some(1000));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(1000).await;
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_bound_concurrent_callers() {
        let limiter = Arc::new(RateLimiter::new(Some(10_000)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    limiter.acquire(2_500).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // 50 000 bytes at 10 000 B/s, less float rounding slack
        assert!(start.elapsed() >= Duration::from_millis(4_990));
        assert_eq!(limiter.metrics().await.bytes_acquired, 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_larger_than_burst() {
        let limiter = RateLimiter::new(Some(100));
        let start = Instant::now();
        limiter.acquire(1_000).await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_capped_at_one_second() {
        let limiter = RateLimiter::new(Some(1000));
        // Idle long enough to earn far more than one second of tokens.
        tokio::time::sleep(Duration::from_secs(60)).await;

        let start = Instant::now();
        limiter.acquire(1000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        limiter.acquire(1000).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_rate_disables_throttling() {
        let limiter = RateLimiter::new(Some(10));
        limiter.set_rate(None).await;

        let start = Instant::now();
        limiter.acquire(1_000_000).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.set_rate(Some(500)).await;
        assert_eq!(limiter.rate().await, Some(500));
        limiter.acquire(1_000).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
