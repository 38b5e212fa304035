use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Bounded in-flight permit pool, shared across every queue that sends to
/// the same scope (region, project, endpoint).
///
/// Lock-free: permits are a pair of atomics so sink completion threads can
/// release without touching the registry locks. Shrinking the limit below
/// the current in-flight count never revokes outstanding permits — they
/// drain naturally as `release` is called.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    limit: AtomicU32,
    in_flight: AtomicI64,
}

impl ConcurrencyLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit: AtomicU32::new(limit),
            in_flight: AtomicI64::new(0),
        }
    }

    /// Take one permit. Returns false, leaving the pool untouched, when the
    /// limiter is saturated.
    pub fn try_acquire(&self) -> bool {
        let limit = i64::from(self.limit.load(Ordering::Acquire));
        let prev = self.in_flight.fetch_add(1, Ordering::AcqRel);
        if prev >= limit {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Return one permit. Saturates at zero so a double release from a
    /// misbehaving sink cannot inflate capacity.
    pub fn release(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Resize the pool at runtime.
    pub fn set_limit(&self, limit: u32) {
        self.limit.store(limit, Ordering::Release);
    }

    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::Acquire)
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }
}
