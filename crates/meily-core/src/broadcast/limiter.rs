use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{errors::Error, Result};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    /// Take one token and return how long the caller must wait before using it.
    ///
    /// Tokens may go negative: a negative balance is a queue of reservations that the
    /// refill pays back in order.
    fn reserve(&mut self, now: Instant, rate_per_sec: f64, burst: f64) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate_per_sec).min(burst);
        self.last_update = now;

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(-self.tokens / rate_per_sec)
    }
}

/// Token bucket shared by every broadcast worker.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_sec: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate_per_sec: f64::from(rate_per_sec.max(1)),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_update: Instant::now(),
            }),
        }
    }

    /// Wait for a slot. Returns `Error::Cancelled` if the token fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let wait = {
            let mut bucket = self.bucket.lock().await;
            bucket.reserve(Instant::now(), self.rate_per_sec, self.burst)
        };
        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = sleep(wait) => Ok(()),
        }
    }
}
