//! Rate limiting for the shared reasoning endpoint.
//!
//! Two independent devices guard every outbound reasoning call:
//! - [`TokenBucket`]: soft cap on call *rate*; `consume` never blocks
//! - a semaphore: hard cap on calls *in flight*
//!
//! [`RateGuard`] combines them. Build one per process and share it by
//! `Arc` with every component that talks to the reasoning service.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};
use tracing::debug;

use crate::config::LimitSettings;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: `capacity` burst, refilled at `refill_rate` tokens/second.
///
/// Invariant: `0 <= tokens <= capacity` after every operation.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`
    pub fn new_at(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Try to take `n` tokens. Returns false without waiting if short.
    pub fn consume(&self, n: f64) -> bool {
        self.consume_at(n, Instant::now())
    }

    /// `consume` against an explicit clock reading.
    ///
    /// Negative or non-finite amounts are refused.
    pub fn consume_at(&self, n: f64, now: Instant) -> bool {
        if !n.is_finite() || n < 0.0 {
            return false;
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.refill(&mut state, now);

        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Current token count (without refilling)
    pub fn tokens(&self) -> f64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        if now > state.last_refill {
            state.last_refill = now;
        }
    }
}

/// Bucket + concurrency cap shared by every reasoning call path
#[derive(Debug)]
pub struct RateGuard {
    bucket: TokenBucket,
    permits: Semaphore,
    max_in_flight: usize,
    backoff: Duration,
}

impl RateGuard {
    pub fn new(bucket: TokenBucket, max_in_flight: usize, backoff: Duration) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            bucket,
            permits: Semaphore::new(max_in_flight),
            max_in_flight,
            backoff,
        }
    }

    pub fn from_settings(settings: &LimitSettings) -> Self {
        Self::new(
            TokenBucket::new(settings.bucket_capacity, settings.refill_per_second),
            settings.max_in_flight,
            Duration::from_millis(settings.backoff_ms),
        )
    }

    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Calls currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    /// Wait for one token, then for a concurrency permit.
    ///
    /// The bucket is polled with a fixed backoff sleep; the permit is held
    /// until the returned guard drops.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        let mut waits = 0u32;
        while !self.bucket.consume(1.0) {
            waits += 1;
            if waits == 1 {
                debug!(backoff_ms = self.backoff.as_millis() as u64, "Rate limited, backing off");
            }
            tokio::time::sleep(self.backoff).await;
        }

        self.permits.acquire().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_three_rate_one() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(3.0, 1.0, start);

        assert!(bucket.consume_at(1.0, start));
        assert!(bucket.consume_at(1.0, start));
        assert!(bucket.consume_at(1.0, start));
        assert!(!bucket.consume_at(1.0, start));

        // One second later one token has come back
        assert!(bucket.consume_at(1.0, start + Duration::from_millis(1000)));
        assert!(!bucket.consume_at(1.0, start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(3.0, 2.0, start);
        let mut now = start;

        // Mixed consumes and clock advances, including long idle periods
        let steps: [(u64, f64); 14] = [
            (0, 1.0),
            (0, -5.0),
            (0, 5.0),
            (0, f64::NAN),
            (10_000, 0.5),
            (0, 3.0),
            (250, 1.0),
            (0, 1.0),
            (3_600_000, 2.0),
            (1, 1.0),
            (0, 0.0),
            (700, 2.5),
            (0, f64::NEG_INFINITY),
            (0, f64::INFINITY),
        ];

        for (advance_ms, n) in steps {
            now += Duration::from_millis(advance_ms);
            bucket.consume_at(n, now);
            let tokens = bucket.tokens();
            assert!(tokens >= 0.0, "tokens went negative: {}", tokens);
            assert!(tokens <= bucket.capacity(), "tokens exceeded capacity: {}", tokens);
        }
    }

    #[test]
    fn test_negative_and_nan_amounts_refused() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(3.0, 1.0, start);

        assert!(!bucket.consume_at(-5.0, start));
        assert!(!bucket.consume_at(f64::NAN, start));
        assert_eq!(bucket.tokens(), 3.0);
    }

    #[test]
    fn test_request_larger_than_capacity_never_succeeds() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(2.0, 1.0, start);
        assert!(!bucket.consume_at(3.0, start + Duration::from_secs(60)));
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn test_clock_going_backwards_does_not_refill() {
        let start = Instant::now() + Duration::from_secs(10);
        let bucket = TokenBucket::new_at(1.0, 1.0, start);
        assert!(bucket.consume_at(1.0, start));
        assert!(!bucket.consume_at(1.0, start - Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_guard_caps_in_flight() {
        let guard = RateGuard::new(TokenBucket::new(10.0, 10.0), 2, Duration::from_millis(1));

        let first = guard.acquire().await.unwrap();
        let _second = guard.acquire().await.unwrap();
        assert_eq!(guard.in_flight(), 2);

        // Third caller has tokens but no permit
        let third = tokio::time::timeout(Duration::from_millis(50), guard.acquire()).await;
        assert!(third.is_err());

        drop(first);
        assert_eq!(guard.in_flight(), 1);
        let _third = guard.acquire().await.unwrap();
        assert_eq!(guard.in_flight(), 2);
    }

    #[test]
    fn test_guard_waits_for_refill() {
        let guard = RateGuard::new(TokenBucket::new(1.0, 20.0), 1, Duration::from_millis(5));

        tokio_test::block_on(async {
            let started = Instant::now();
            drop(guard.acquire().await.unwrap());
            drop(guard.acquire().await.unwrap());
            // Second token needs ~50ms of refill at 20/s
            assert!(started.elapsed() >= Duration::from_millis(30));
        });
    }
}
