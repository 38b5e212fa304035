use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::error::{PushError, PushResult};
use crate::item::SenderQueueItem;
use crate::key::QueueKey;
use crate::pipeline::PipelineContext;

use super::concurrency::ConcurrencyLimiter;
use super::config::QueueParams;
use super::rate::RateLimiter;

/// Invoked when a queue that rejected a push drains back below its low
/// watermark, so the producing pipeline may resume building batches.
///
/// Runs while the registry's queue lock is held: keep it cheap and never
/// call back into the registry from it.
pub type BackpressureCallback = Arc<dyn Fn(QueueKey) + Send + Sync>;

/// Bounded per-destination send queue.
///
/// Pending items wait in FIFO order; items handed to the dispatch loop move
/// to the in-flight set until the sink finalises them with [`remove`].
/// Admission is a soft gate at the high watermark, the capacity is the hard
/// bound: `pending + in_flight <= capacity` always holds.
///
/// [`remove`]: SenderQueue::remove
pub struct SenderQueue {
    key: QueueKey,
    flusher_id: String,
    ctx: Arc<PipelineContext>,
    capacity: usize,
    low_watermark: usize,
    high_watermark: usize,
    pending: VecDeque<Arc<SenderQueueItem>>,
    in_flight: Vec<Arc<SenderQueueItem>>,
    concurrency_limiters: HashMap<String, Arc<ConcurrencyLimiter>>,
    rate_limiter: Option<RateLimiter>,
    /// Armed by a rejected push, disarmed when the release signal fires.
    backpressure_armed: bool,
    on_backpressure_released: Option<BackpressureCallback>,
}

impl SenderQueue {
    pub fn new(
        params: QueueParams,
        key: QueueKey,
        flusher_id: impl Into<String>,
        ctx: Arc<PipelineContext>,
    ) -> Self {
        Self {
            key,
            flusher_id: flusher_id.into(),
            ctx,
            capacity: params.capacity,
            low_watermark: params.low_watermark,
            high_watermark: params.high_watermark,
            pending: VecDeque::with_capacity(params.capacity),
            in_flight: Vec::new(),
            concurrency_limiters: HashMap::new(),
            rate_limiter: None,
            backpressure_armed: false,
            on_backpressure_released: None,
        }
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    pub fn flusher_id(&self) -> &str {
        &self.flusher_id
    }

    pub fn pipeline_context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn low_watermark(&self) -> usize {
        self.low_watermark
    }

    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    /// Pending plus in-flight depth.
    pub fn size(&self) -> usize {
        self.pending.len() + self.in_flight.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Items currently handed to sinks and not yet finalised.
    pub fn sending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    /// Admission gate: depth strictly below the high watermark.
    pub fn valid_to_push(&self) -> bool {
        self.size() < self.high_watermark
    }

    /// Append an item to the tail, or reject it when the queue sits at its
    /// high watermark. A rejection arms the backpressure signal.
    pub fn push(&mut self, item: SenderQueueItem) -> PushResult {
        if !self.valid_to_push() {
            self.backpressure_armed = true;
            return Err(PushError::QueueFull);
        }
        self.pending.push_back(Arc::new(item));
        Ok(())
    }

    /// Move up to `limit` items (`None` = unbounded) from the head into the
    /// in-flight set and append them to `out`.
    ///
    /// Each item must win one permit from every attached concurrency scope
    /// and fit the rate limiter's remaining byte budget; acquisition is
    /// atomic with removal. The scan stops at the first item that is denied,
    /// keeping the queue FIFO — that item is revisited next cycle.
    pub fn get_available(
        &mut self,
        out: &mut Vec<Arc<SenderQueueItem>>,
        limit: Option<usize>,
    ) -> usize {
        let mut taken = 0usize;
        while limit.map_or(true, |l| taken < l) {
            let Some(front) = self.pending.front() else {
                break;
            };
            let size = front.size();

            if !self.try_acquire_concurrency() {
                break;
            }
            if let Some(rate) = self.rate_limiter.as_mut() {
                if !rate.try_consume(size) {
                    // Give back the permits taken for this item
                    Self::release_limiters(&self.concurrency_limiters);
                    break;
                }
            }

            let item = self.pending.pop_front().expect("front was just peeked");
            self.in_flight.push(Arc::clone(&item));
            out.push(item);
            taken += 1;
        }
        taken
    }

    /// Finalise a dispatched item on sink completion. Returns false if the
    /// item is not in flight here. Does not release concurrency permits —
    /// the sink calls [`release_concurrency`] separately, once per item.
    ///
    /// [`release_concurrency`]: SenderQueue::release_concurrency
    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(idx) = self.in_flight.iter().position(|item| item.id() == id) else {
            return false;
        };
        self.in_flight.swap_remove(idx);
        self.maybe_release_backpressure();
        true
    }

    /// Return one permit in each attached concurrency scope. Callers invoke
    /// this exactly once per item returned by [`get_available`].
    ///
    /// [`get_available`]: SenderQueue::get_available
    pub fn release_concurrency(&mut self) {
        Self::release_limiters(&self.concurrency_limiters);
    }

    /// Swap the attached concurrency scopes. In-flight items keep the
    /// permits they already hold; subsequent releases go to the new scopes.
    pub fn set_concurrency_limiters(
        &mut self,
        limiters: HashMap<String, Arc<ConcurrencyLimiter>>,
    ) {
        self.concurrency_limiters = limiters;
    }

    pub fn concurrency_limiter(&self, scope: &str) -> Option<&Arc<ConcurrencyLimiter>> {
        self.concurrency_limiters.get(scope)
    }

    /// Reconfigure the byte rate. 0 removes the limiter entirely.
    pub fn set_rate_limiter(&mut self, max_rate: u32) {
        if max_rate == 0 {
            self.rate_limiter = None;
        } else {
            match self.rate_limiter.as_mut() {
                Some(rate) => rate.set_rate(max_rate),
                None => self.rate_limiter = Some(RateLimiter::new(max_rate)),
            }
        }
    }

    pub fn refill_rate_limiter(&mut self, now: Instant) {
        if let Some(rate) = self.rate_limiter.as_mut() {
            rate.refill(now);
        }
    }

    /// Rebind the pipeline back-reference on every pending and in-flight
    /// item (config reload keeps items while the pipeline object changes).
    pub fn set_pipeline_for_items(&mut self, pipeline: &Arc<PipelineContext>) {
        for item in &self.pending {
            item.rebind_pipeline(pipeline);
        }
        for item in &self.in_flight {
            item.rebind_pipeline(pipeline);
        }
    }

    pub fn set_backpressure_callback(&mut self, callback: BackpressureCallback) {
        self.on_backpressure_released = Some(callback);
    }

    /// Acquire one permit from every scope, or none at all.
    fn try_acquire_concurrency(&self) -> bool {
        let mut acquired: Vec<&Arc<ConcurrencyLimiter>> = Vec::new();
        for limiter in self.concurrency_limiters.values() {
            if limiter.try_acquire() {
                acquired.push(limiter);
            } else {
                for held in acquired {
                    held.release();
                }
                return false;
            }
        }
        true
    }

    fn release_limiters(limiters: &HashMap<String, Arc<ConcurrencyLimiter>>) {
        for limiter in limiters.values() {
            limiter.release();
        }
    }

    fn maybe_release_backpressure(&mut self) {
        if self.backpressure_armed && self.size() < self.low_watermark {
            self.backpressure_armed = false;
            if let Some(callback) = &self.on_backpressure_released {
                callback(self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Arc<PipelineContext> {
        Arc::new(PipelineContext::new("cfg", "proj", "store"))
    }

    fn params(capacity: usize, low: usize, high: usize) -> QueueParams {
        QueueParams {
            capacity,
            low_watermark: low,
            high_watermark: high,
        }
    }

    fn queue(capacity: usize, low: usize, high: usize) -> SenderQueue {
        SenderQueue::new(params(capacity, low, high), QueueKey::test(7), "flusher-0", ctx())
    }

    fn item_for(q: &SenderQueue, bytes: usize) -> SenderQueueItem {
        SenderQueueItem::new(q.key(), SinkKind::Http, vec![0u8; bytes], bytes, q.pipeline_context())
    }

    #[test]
    fn push_then_drain_preserves_fifo_order() {
        let mut q = queue(3, 3, 3);
        let mut ids = Vec::new();
        for _ in 0..3 {
            let item = item_for(&q, 8);
            ids.push(item.id());
            q.push(item).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(q.get_available(&mut out, None), 3);
        let drained: Vec<_> = out.iter().map(|i| i.id()).collect();
        assert_eq!(drained, ids);

        // Items are in flight, not gone
        assert_eq!(q.pending_len(), 0);
        assert_eq!(q.sending(), 3);
        assert!(!q.is_empty());

        for id in ids {
            assert!(q.remove(id));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn push_rejected_at_high_watermark() {
        let mut q = queue(2, 2, 2);
        q.push(item_for(&q, 1)).unwrap();
        q.push(item_for(&q, 1)).unwrap();
        assert!(!q.valid_to_push());
        assert_eq!(q.push(item_for(&q, 1)), Err(PushError::QueueFull));
    }

    #[test]
    fn in_flight_items_count_against_the_watermark() {
        let mut q = queue(2, 2, 2);
        q.push(item_for(&q, 1)).unwrap();
        q.push(item_for(&q, 1)).unwrap();

        let mut out = Vec::new();
        q.get_available(&mut out, None);
        assert_eq!(q.sending(), 2);

        // Still full: sending counts towards the watermark
        assert!(!q.valid_to_push());
        assert_eq!(q.push(item_for(&q, 1)), Err(PushError::QueueFull));

        assert!(q.remove(out[0].id()));
        assert!(q.valid_to_push());
        q.push(item_for(&q, 1)).unwrap();
    }

    #[test]
    fn capacity_invariant_holds_through_mixed_operations() {
        let mut q = queue(5, 2, 4);
        let mut out = Vec::new();
        for round in 0..20 {
            for _ in 0..3 {
                let _ = q.push(item_for(&q, 1));
            }
            assert!(q.size() <= q.capacity());
            q.get_available(&mut out, Some(2));
            assert!(q.size() <= q.capacity());
            if round % 2 == 0 {
                if let Some(item) = out.pop() {
                    q.remove(item.id());
                }
            }
            assert!(q.size() <= q.capacity());
        }
    }

    #[test]
    fn limit_bounds_the_drain() {
        let mut q = queue(10, 10, 10);
        for _ in 0..6 {
            q.push(item_for(&q, 1)).unwrap();
        }
        let mut out = Vec::new();
        assert_eq!(q.get_available(&mut out, Some(4)), 4);
        assert_eq!(q.pending_len(), 2);
        assert_eq!(q.get_available(&mut out, Some(0)), 0);
    }

    #[test]
    fn concurrency_limiter_caps_the_batch() {
        let mut q = queue(10, 10, 10);
        for _ in 0..5 {
            q.push(item_for(&q, 1)).unwrap();
        }
        let limiter = Arc::new(ConcurrencyLimiter::new(2));
        q.set_concurrency_limiters(HashMap::from([(
            "region".to_string(),
            Arc::clone(&limiter),
        )]));

        let mut out = Vec::new();
        assert_eq!(q.get_available(&mut out, None), 2);
        assert_eq!(q.pending_len(), 3);
        assert_eq!(limiter.in_flight(), 2);

        // Nothing more until permits come back
        assert_eq!(q.get_available(&mut out, None), 0);
        q.release_concurrency();
        q.release_concurrency();
        assert_eq!(q.get_available(&mut out, None), 2);
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn all_scopes_must_grant_a_permit() {
        let mut q = queue(10, 10, 10);
        for _ in 0..3 {
            q.push(item_for(&q, 1)).unwrap();
        }
        let region = Arc::new(ConcurrencyLimiter::new(5));
        let project = Arc::new(ConcurrencyLimiter::new(1));
        q.set_concurrency_limiters(HashMap::from([
            ("region".to_string(), Arc::clone(&region)),
            ("project".to_string(), Arc::clone(&project)),
        ]));

        let mut out = Vec::new();
        assert_eq!(q.get_available(&mut out, None), 1);
        // The denied attempt must not leak permits from the granting scope
        assert_eq!(region.in_flight(), 1);
        assert_eq!(project.in_flight(), 1);
    }

    #[test]
    fn rate_limiter_blocks_the_head() {
        let mut q = queue(10, 10, 10);
        for _ in 0..4 {
            q.push(item_for(&q, 100)).unwrap();
        }
        q.set_rate_limiter(250);

        let mut out = Vec::new();
        // 250-byte budget admits two 100-byte items
        assert_eq!(q.get_available(&mut out, None), 2);
        assert_eq!(q.pending_len(), 2);

        // Unlimited again after reconfiguration to zero
        q.set_rate_limiter(0);
        assert_eq!(q.get_available(&mut out, None), 2);
    }

    #[test]
    fn rate_denial_returns_concurrency_permits() {
        let mut q = queue(10, 10, 10);
        q.push(item_for(&q, 100)).unwrap();
        let limiter = Arc::new(ConcurrencyLimiter::new(4));
        q.set_concurrency_limiters(HashMap::from([("ep".to_string(), Arc::clone(&limiter))]));
        q.set_rate_limiter(10);

        let mut out = Vec::new();
        assert_eq!(q.get_available(&mut out, None), 0);
        assert_eq!(limiter.in_flight(), 0, "permit must be rolled back");
    }

    #[test]
    fn backpressure_callback_fires_below_low_watermark() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut q = queue(4, 2, 4);
        let observed = Arc::clone(&fired);
        q.set_backpressure_callback(Arc::new(move |_key| {
            observed.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..4 {
            q.push(item_for(&q, 1)).unwrap();
        }
        assert_eq!(q.push(item_for(&q, 1)), Err(PushError::QueueFull));

        let mut out = Vec::new();
        q.get_available(&mut out, None);
        // Draining alone moves items to in-flight; depth is unchanged
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        q.remove(out[0].id());
        q.remove(out[1].id());
        // size = 2, not yet below low watermark of 2
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        q.remove(out[2].id());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Signal is edge-triggered: further removals do not re-fire
        q.remove(out[3].id());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_unknown_id_is_false() {
        let mut q = queue(2, 2, 2);
        q.push(item_for(&q, 1)).unwrap();
        let stray = item_for(&q, 1);
        assert!(!q.remove(stray.id()));
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn rebind_walks_pending_and_in_flight() {
        let mut q = queue(4, 4, 4);
        for _ in 0..4 {
            q.push(item_for(&q, 1)).unwrap();
        }
        let mut out = Vec::new();
        q.get_available(&mut out, Some(2));

        let swapped = Arc::new(PipelineContext::new("cfg-v2", "proj", "store"));
        q.set_pipeline_for_items(&swapped);

        for item in out.iter() {
            assert_eq!(item.pipeline().unwrap().name, "cfg-v2");
        }
        let mut rest = Vec::new();
        q.get_available(&mut rest, None);
        for item in rest.iter() {
            assert_eq!(item.pipeline().unwrap().name, "cfg-v2");
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any accepted push sequence drains back out in push order,
            /// regardless of how the drain is sliced.
            #[test]
            fn fifo_round_trip(slices in proptest::collection::vec(1usize..4, 1..20)) {
                let total: usize = slices.iter().sum();
                let mut q = SenderQueue::new(
                    QueueParams { capacity: total, low_watermark: total, high_watermark: total },
                    QueueKey::test(1),
                    "flusher-0",
                    ctx(),
                );
                let mut pushed = Vec::new();
                for _ in 0..total {
                    let item = item_for(&q, 1);
                    pushed.push(item.id());
                    q.push(item).unwrap();
                }

                let mut out = Vec::new();
                for slice in &slices {
                    q.get_available(&mut out, Some(*slice));
                }
                let drained: Vec<_> = out.iter().map(|i| i.id()).collect();
                prop_assert_eq!(drained, pushed);
            }

            /// Depth never exceeds capacity under arbitrary interleavings of
            /// push, drain and remove.
            #[test]
            fn depth_bounded_by_capacity(ops in proptest::collection::vec(0u8..3, 1..200)) {
                let mut q = queue(6, 3, 5);
                let mut in_flight: Vec<Arc<SenderQueueItem>> = Vec::new();
                for op in ops {
                    match op {
                        0 => {
                            let item = item_for(&q, 1);
                            let _ = q.push(item);
                        }
                        1 => {
                            q.get_available(&mut in_flight, Some(2));
                        }
                        _ => {
                            if let Some(item) = in_flight.pop() {
                                q.remove(item.id());
                            }
                        }
                    }
                    prop_assert!(q.size() <= q.capacity());
                    prop_assert_eq!(q.size(), q.pending_len() + q.sending());
                }
            }
        }
    }
}
