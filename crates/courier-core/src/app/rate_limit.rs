//! RateLimiter - leaky bucket によるサイクル開始の流量制限
//!
//! - 容量 `max_rate`、`max_rate / time_period` 件/秒で漏れる
//! - バケットは空から始まる（最初の `max_rate` 回は即時）
//! - 溢れる場合は拒否せず、空きができるまで待つ
//!
//! `tokio::time::Instant` を使うので、paused clock のテストでも決定的に動きます。

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Float slack so a wait of exactly the computed delay always admits.
const EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct Bucket {
    level: f64,
    last_leak: Option<Instant>,
}

impl Bucket {
    fn leak(&mut self, now: Instant, per_second: f64) {
        if let Some(last) = self.last_leak {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            self.level = (self.level - elapsed * per_second).max(0.0);
        }
        self.last_leak = Some(now);
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// At most `max_rate` acquisitions per `time_period`.
    ///
    /// Callers validate both values as positive. A `max_rate` below one still
    /// admits single acquisitions, just spaced out accordingly.
    pub fn new(max_rate: f64, time_period: Duration) -> Self {
        Self {
            capacity: max_rate.max(1.0),
            per_second: max_rate / time_period.as_secs_f64(),
            bucket: Mutex::new(Bucket {
                level: 0.0,
                last_leak: None,
            }),
        }
    }

    /// Take one slot, or report how long until one frees up.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self
            .bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bucket.leak(Instant::now(), self.per_second);

        if bucket.level + 1.0 <= self.capacity + EPSILON {
            bucket.level += 1.0;
            Ok(())
        } else {
            let excess = bucket.level + 1.0 - self.capacity;
            Err(Duration::from_secs_f64(excess / self.per_second))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_take().is_ok()
    }

    /// Wait until a slot is free, then take it. Never rejects.
    pub async fn acquire(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_max_rate_acquisitions_are_immediate() {
        let limiter = RateLimiter::new(3.0, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_waits_for_the_bucket_to_leak() {
        let limiter = RateLimiter::new(2.0, Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // 2 per second leaks one slot every 500ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn default_rate_spaces_cycles_by_the_period() {
        let limiter = RateLimiter::new(1.0, Duration::from_secs(10));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn fractional_rate_still_admits() {
        let limiter = RateLimiter::new(0.5, Duration::from_secs(1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_refills_capacity() {
        let limiter = RateLimiter::new(2.0, Duration::from_secs(1));
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(!limiter.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
