use std::time::{Duration, Instant};

/// Capacity and refill rate applied uniformly to every resource bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 2,
            refill_per_second: 2.0,
        }
    }
}

/// A single token bucket. Not `Send`-shared directly; callers wrap it in a
/// `Mutex` (see [`crate::ResilienceRegistry`]), which hands out the lock to
/// waiters in arrival order. `acquire` lets the balance go negative under
/// that lock so each waiter's debt stacks on the ones ahead of it, rather
/// than every drained caller computing the same wait off a floor of zero.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill_at: Instant,
}

impl TokenBucket {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            capacity: config.capacity as f64,
            refill_rate: config.refill_per_second,
            tokens: config.capacity as f64,
            last_refill_at: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill_at = now;
    }

    /// Debit one token unconditionally, allowing the balance to go negative
    /// when the bucket is drained. Returns `None` when a token was already
    /// available; otherwise `Some(wait)`, the time until refill covers the
    /// resulting debt. Because the debit (not just the check) happens here,
    /// a caller that arrives while the bucket is already in debt is charged
    /// for the full queue ahead of it instead of racing everyone else for
    /// the same single token's worth of wait.
    pub fn acquire(&mut self) -> Option<Duration> {
        self.refill();
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(-self.tokens / self.refill_rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_drains_capacity_then_reports_wait() {
        let mut bucket = TokenBucket::new(RateLimiterConfig {
            capacity: 2,
            refill_per_second: 1.0,
        });
        assert!(bucket.acquire().is_none());
        assert!(bucket.acquire().is_none());
        assert!(bucket.acquire().is_some());
    }

    #[test]
    fn refill_restores_tokens_over_time() {
        let mut bucket = TokenBucket::new(RateLimiterConfig {
            capacity: 1,
            refill_per_second: 1000.0,
        });
        assert!(bucket.acquire().is_none());
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.acquire().is_none());
    }

    #[test]
    fn stacked_acquires_on_a_drained_bucket_get_increasing_waits() {
        let mut bucket = TokenBucket::new(RateLimiterConfig {
            capacity: 1,
            refill_per_second: 1.0,
        });
        assert!(bucket.acquire().is_none());
        let first = bucket.acquire().unwrap();
        let second = bucket.acquire().unwrap();
        let third = bucket.acquire().unwrap();
        assert!(second > first);
        assert!(third > second);
    }
}
