//! Token bucket pacing the warmup workers.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Take one token, going into debt if none is available. Returns how long
    /// the caller has to wait before its token is paid for.
    fn reserve(&mut self, capacity: f64, refill_rate: f64) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
        self.tokens -= 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / refill_rate)
        }
    }
}

/// Shared rate limiter: at most `rate` acquisitions per second after an
/// initial burst of `burst`.
pub struct Throttle {
    bucket: Mutex<TokenBucket>,
    rate: f64,
    burst: f64,
}

impl Throttle {
    pub fn new(rate: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(TokenBucket::new(burst)),
            rate: f64::from(rate.max(1)),
            burst,
        }
    }

    /// Wait for a token. Reservations are taken in arrival order, so waiters
    /// never starve each other.
    pub async fn acquire(&self) {
        let wait = self.bucket.lock().reserve(self.burst, self.rate);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}
