//! Upstream Call Pacing
//!
//! Enforces a minimum spacing between outbound upstream calls. The free
//! tier of the quote provider budgets five calls per minute; the gateway
//! spaces calls rather than bursting and hoping.
//!
//! # Design
//!
//! Admission times are reserved inside a single critical section: each
//! caller takes the later of "now" and "previous admission + interval" as
//! its slot, records it, and then sleeps outside the lock until its slot
//! arrives. The tokio mutex queues waiters in FIFO arrival order, so
//! admission order follows arrival order and consecutive returns are
//! always at least one interval apart.
//!
//! `acquire` never errors; at worst a caller waits.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

// =============================================================================
// Rate Limiter
// =============================================================================

/// Minimum-interval spacing gate for upstream calls.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_admission: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter that admits at most one caller per `min_interval`.
    ///
    /// A zero interval disables pacing entirely.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_admission: Mutex::const_new(None),
        }
    }

    /// The configured minimum spacing.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until at least `min_interval` has elapsed since the previous
    /// admission, then record this caller's admission and return.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let admit_at = {
            let mut last = self.last_admission.lock().await;
            let now = Instant::now();
            let admit_at = match *last {
                Some(previous) => now.max(previous + self.min_interval),
                None => now,
            };
            *last = Some(admit_at);
            admit_at
        };

        sleep_until(admit_at).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(Duration::from_secs(12));

        let started = Instant::now();
        limiter.acquire().await;

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_acquires_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(12));

        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // Two gaps after the immediate first admission
        assert!(started.elapsed() >= Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_are_spaced() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut admissions = Vec::new();
        for handle in handles {
            admissions.push(handle.await.unwrap());
        }
        admissions.sort();

        for pair in admissions.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_interval_admits_immediately() {
        let limiter = RateLimiter::new(Duration::from_secs(12));

        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        let started = Instant::now();
        limiter.acquire().await;

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_disables_pacing() {
        let limiter = RateLimiter::new(Duration::ZERO);

        let started = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }

        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
