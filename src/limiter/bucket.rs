use crate::limiter::Decision;
use std::time::Duration;

/// A single-token bucket that refills continuously.
///
/// Holds at most `capacity` tokens and gains one token per `period`. With the default
/// capacity of one this reads as "one admitted action per period, measured from the
/// last admitted action"; unused time never accumulates into a burst.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    updated_millis: u64,
    period: Duration,
    capacity: f64,
}

impl TokenBucket {
    /// A full bucket that refills one token every `period`.
    pub fn full(period: Duration, now_millis: u64) -> Self {
        Self::with_capacity(period, 1.0, now_millis)
    }

    /// A full bucket with a custom capacity.
    pub fn with_capacity(period: Duration, capacity: f64, now_millis: u64) -> Self {
        Self { tokens: capacity, updated_millis: now_millis, period, capacity }
    }

    /// Refill period for one token.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tokens available at `now_millis`, without consuming.
    pub fn available(&self, now_millis: u64) -> f64 {
        let elapsed = now_millis.saturating_sub(self.updated_millis) as f64;
        let period_millis = self.period.as_millis().max(1) as f64;
        (self.tokens + elapsed / period_millis).min(self.capacity)
    }

    /// Attempt to take one token at `now_millis`.
    pub fn try_take(&mut self, now_millis: u64) -> Decision {
        let available = self.available(now_millis);
        // A clock that stepped backwards must not rewind the refill origin.
        let now_millis = now_millis.max(self.updated_millis);

        if available >= 1.0 {
            self.tokens = available - 1.0;
            self.updated_millis = now_millis;
            return Decision::Allowed;
        }

        let missing = 1.0 - available;
        let wait_millis = (missing * self.period.as_millis() as f64).ceil() as u64;
        Decision::Denied { wait: Duration::from_millis(wait_millis) }
    }
}
