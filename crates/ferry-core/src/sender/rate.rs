use std::time::Instant;

/// Token bucket over payload bytes for a single sender queue.
///
/// Holds at most `max_rate` tokens and refills continuously at `max_rate`
/// tokens per second, so no more than `max_rate` bytes pass in any
/// one-second window. Mutated only under the owning queue's lock.
#[derive(Debug)]
pub struct RateLimiter {
    tokens: f64,
    max_rate: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a bucket starting at full capacity. `max_rate` is in bytes
    /// per second and must be non-zero (a zero rate means "no limiter" and
    /// is handled by the queue holding `None` instead).
    pub fn new(max_rate: u32) -> Self {
        Self::with_time(max_rate, Instant::now())
    }

    fn with_time(max_rate: u32, now: Instant) -> Self {
        let rate = f64::from(max_rate.max(1));
        Self {
            tokens: rate,
            max_rate: rate,
            last_refill: now,
        }
    }

    /// Refill tokens for the time elapsed since the last refill, capped at
    /// the bucket capacity.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.max_rate).min(self.max_rate);
            self.last_refill = now;
        }
    }

    /// Try to consume `n` byte-tokens. Returns true and decrements if the
    /// bucket holds at least `n`; leaves the bucket untouched otherwise.
    pub fn try_consume(&mut self, n: usize) -> bool {
        let n = n as f64;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Change the rate in place. Current tokens are clamped to the new
    /// capacity; in-flight sends are unaffected.
    pub fn set_rate(&mut self, max_rate: u32) {
        self.max_rate = f64::from(max_rate.max(1));
        self.tokens = self.tokens.min(self.max_rate);
    }

    /// Current token count (for inspection).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}
