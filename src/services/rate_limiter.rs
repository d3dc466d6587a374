use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

/// Rate limiter to control API request frequency
///
/// Prevents exhausting the free-tier quotas of the market-data providers
/// (Twelve Data: 8 req/min, Alpha Vantage: 5 req/min).
pub struct RateLimiter {
    /// Semaphore to limit concurrent requests
    semaphore: Arc<Semaphore>,
    /// Last request timestamp to enforce minimum delay between requests
    last_request: Arc<Mutex<Instant>>,
    /// Minimum delay between requests
    min_delay: Duration,
}

impl RateLimiter {
    /// `max_concurrent` bounds in-flight requests; `requests_per_minute`
    /// sets the pacing between consecutive requests.
    pub fn new(max_concurrent: usize, requests_per_minute: u32) -> Self {
        let min_delay_ms = 60_000 / requests_per_minute as u64;
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            last_request: Arc::new(Mutex::new(Instant::now() - Duration::from_secs(60))),
            min_delay: Duration::from_millis(min_delay_ms),
        }
    }

    /// Acquire permission to make a request. Blocks until a permit is free
    /// and the pacing delay has elapsed; returns a guard that releases the
    /// permit when dropped.
    pub async fn acquire(&self) -> RateLimitGuard {
        let permit = self.semaphore.clone().acquire_owned().await.unwrap();

        let wait_time = {
            let last = self.last_request.lock();
            let elapsed = last.elapsed();

            if elapsed < self.min_delay {
                Some(self.min_delay - elapsed)
            } else {
                None
            }
        }; // lock dropped here; sleep outside it

        if let Some(delay) = wait_time {
            sleep(delay).await;
        }

        *self.last_request.lock() = Instant::now();

        RateLimitGuard { _permit: permit }
    }

    #[allow(dead_code)]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Guard holding a rate-limit permit; released on drop.
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;

    #[tokio::test]
    async fn test_rate_limiter_enforces_delay() {
        // 2 concurrent, 60 per minute (1 per second)
        let limiter = RateLimiter::new(2, 60);

        let start = StdInstant::now();

        let guard1 = limiter.acquire().await;
        let elapsed1 = start.elapsed();
        assert!(elapsed1.as_millis() < 100, "First request should be immediate");
        drop(guard1);

        let _guard2 = limiter.acquire().await;
        let elapsed2 = start.elapsed();
        assert!(elapsed2.as_millis() >= 900, "Second request should wait ~1 second");
    }

    #[tokio::test]
    async fn test_concurrent_limit() {
        let limiter = Arc::new(RateLimiter::new(2, 120));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let _guard = limiter.acquire().await;
                    sleep(Duration::from_millis(100)).await;
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
