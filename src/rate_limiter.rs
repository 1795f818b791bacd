use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ReplayError;

// ─── Token bucket ────────────────────────────────────────────────

/// Global admission gate for log lines.
///
/// Tokens refill continuously at `rate` per second up to `burst`.  A caller
/// that finds the bucket empty reserves the next token anyway (the balance
/// goes negative) and sleeps until that token has been earned, so waiters
/// are served in arrival order without a background refill task.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Limiter admitting `rate` lines per second; `rate <= 0` disables it.
    pub fn new(rate: f64) -> Self {
        if rate <= 0.0 || !rate.is_finite() {
            return Self::unlimited();
        }

        let burst = Self::burst_for(rate) as f64;
        Self {
            bucket: Some(Mutex::new(Bucket {
                rate,
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// A tenth of a second worth of tokens, never less than one.
    pub fn burst_for(rate: f64) -> u64 {
        ((rate / 10.0) as u64).max(1)
    }

    pub fn is_limited(&self) -> bool {
        self.bucket.is_some()
    }

    /// Wait for one token.  Returns `Cancelled` as soon as `cancel` fires,
    /// handing the reserved token back.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ReplayError> {
        if cancel.is_cancelled() {
            return Err(ReplayError::Cancelled);
        }
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        let ready_at = {
            let mut bucket = bucket.lock();
            let now = Instant::now();
            bucket.refill(now);
            bucket.tokens -= 1.0;
            if bucket.tokens >= 0.0 {
                return Ok(());
            }
            now + Duration::from_secs_f64(-bucket.tokens / bucket.rate)
        };

        tokio::select! {
            _ = sleep_until(ready_at) => Ok(()),
            _ = cancel.cancelled() => {
                let mut bucket = bucket.lock();
                bucket.refill(Instant::now());
                bucket.tokens = (bucket.tokens + 1.0).min(bucket.burst);
                Err(ReplayError::Cancelled)
            }
        }
    }
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }
}
