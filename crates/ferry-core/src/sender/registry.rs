use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{PushError, PushResult};
use crate::exactly_once::ExactlyOnceRegistry;
use crate::item::SenderQueueItem;
use crate::key::{KeyAllocator, QueueKey};
use crate::pipeline::PipelineContext;

use super::concurrency::ConcurrencyLimiter;
use super::config::{QueueParams, SenderConfig};
use super::queue::{BackpressureCallback, SenderQueue};
use super::stats::{QueueStats, RegistryStats};

/// Edge-triggered wake-up shared by producers and the dispatch worker.
/// Consecutive triggers collapse into one wake.
struct WakeSignal {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = self.ready.lock().unwrap();
        let (mut ready, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap();
        if *ready {
            *ready = false;
            true
        } else {
            false
        }
    }

    fn trigger(&self) {
        *self.ready.lock().unwrap() = true;
        self.cond.notify_one();
    }
}

/// Active queues plus the rotation cursor for the fair drain. One lock
/// covers both so a drain cycle sees a consistent ordering.
struct QueueMap {
    queues: BTreeMap<QueueKey, SenderQueue>,
    round_robin_start: usize,
}

/// Process-wide map of destination key to sender queue.
///
/// Two independent mutexes: one over the active map, one over the
/// deletion-timestamp map. Queue destruction during GC takes the GC lock
/// first and nests the queue lock inside it; no path acquires them in the
/// reverse order.
pub struct QueueRegistry {
    params: QueueParams,
    gc_threshold: Duration,
    queues: Mutex<QueueMap>,
    tombstones: Mutex<HashMap<QueueKey, Instant>>,
    wake: WakeSignal,
    allocator: Arc<KeyAllocator>,
    exactly_once: Option<Arc<dyn ExactlyOnceRegistry>>,
}

impl QueueRegistry {
    pub fn new(
        config: &SenderConfig,
        allocator: Arc<KeyAllocator>,
        exactly_once: Option<Arc<dyn ExactlyOnceRegistry>>,
    ) -> Self {
        Self {
            params: config.queue_params(),
            gc_threshold: Duration::from_secs(config.gc_threshold_secs),
            queues: Mutex::new(QueueMap {
                queues: BTreeMap::new(),
                round_robin_start: 0,
            }),
            tombstones: Mutex::new(HashMap::new()),
            wake: WakeSignal::new(),
            allocator,
            exactly_once,
        }
    }

    /// Create the queue for `key`, or reconfigure it in place when it
    /// already exists — limiters and rate are always refreshed, buffered
    /// items are never dropped.
    pub fn create_queue(
        &self,
        key: QueueKey,
        flusher_id: &str,
        ctx: Arc<PipelineContext>,
        concurrency_limiters: HashMap<String, Arc<ConcurrencyLimiter>>,
        max_rate: u32,
    ) -> bool {
        let mut map = self.queues.lock().unwrap();
        let queue = map
            .queues
            .entry(key)
            .or_insert_with(|| SenderQueue::new(self.params, key, flusher_id, ctx));
        queue.set_concurrency_limiters(concurrency_limiters);
        queue.set_rate_limiter(max_rate);
        true
    }

    /// Run `f` against the queue for `key`, if it exists.
    pub fn with_queue<R>(&self, key: QueueKey, f: impl FnOnce(&mut SenderQueue) -> R) -> Option<R> {
        let mut map = self.queues.lock().unwrap();
        map.queues.get_mut(&key).map(f)
    }

    pub fn has_queue(&self, key: QueueKey) -> bool {
        self.queues.lock().unwrap().queues.contains_key(&key)
    }

    /// Tombstone the queue for deferred destruction. It keeps serving until
    /// it is empty and the grace period has elapsed. Returns false if the
    /// queue does not exist or is already tombstoned.
    pub fn delete_queue(&self, key: QueueKey) -> bool {
        {
            let map = self.queues.lock().unwrap();
            if !map.queues.contains_key(&key) {
                return false;
            }
        }
        let mut tombstones = self.tombstones.lock().unwrap();
        if tombstones.contains_key(&key) {
            return false;
        }
        tombstones.insert(key, Instant::now());
        true
    }

    /// Revive a tombstoned queue before GC fires. Returns false if the key
    /// was not tombstoned.
    pub fn reuse_queue(&self, key: QueueKey) -> bool {
        self.tombstones.lock().unwrap().remove(&key).is_some()
    }

    pub fn is_marked_deleted(&self, key: QueueKey) -> bool {
        self.tombstones.lock().unwrap().contains_key(&key)
    }

    /// Route an item to its queue, or to the exactly-once registry when the
    /// key is not bound here. A successful push wakes the dispatch worker.
    pub fn push(&self, key: QueueKey, item: SenderQueueItem) -> PushResult {
        let mut map = self.queues.lock().unwrap();
        let result = if let Some(queue) = map.queues.get_mut(&key) {
            let result = queue.push(item);
            drop(map);
            result
        } else {
            drop(map);
            match &self.exactly_once {
                Some(exactly_once) => exactly_once.push_sender(key, item),
                None => Err(PushError::UnknownKey(key)),
            }
        };
        if result.is_ok() {
            self.trigger();
        }
        result
    }

    /// Admission probe for producers; false for unknown keys.
    pub fn valid_to_push(&self, key: QueueKey) -> bool {
        let map = self.queues.lock().unwrap();
        match map.queues.get(&key) {
            Some(queue) => queue.valid_to_push(),
            None => {
                // Exactly-once producers keep their own admission state
                warn!(%key, "valid_to_push on unknown key");
                false
            }
        }
    }

    /// One fair drain cycle: a bounded slice from every queue, starting at
    /// the rotation cursor, then whatever the exactly-once registry offers.
    ///
    /// Per-queue slice is `max(capacity * 0.3, limit / n)`, so small
    /// registries still move batches and large ones split the budget
    /// evenly. `None` drains everything in registry order.
    pub fn get_available_items(
        &self,
        out: &mut Vec<Arc<SenderQueueItem>>,
        limit: Option<usize>,
    ) {
        {
            let mut guard = self.queues.lock().unwrap();
            let map = &mut *guard;
            let n = map.queues.len();
            if n != 0 {
                match limit {
                    None => {
                        for queue in map.queues.values_mut() {
                            queue.get_available(out, None);
                        }
                    }
                    Some(limit) => {
                        let slice = usize::max(self.params.capacity * 3 / 10, limit / n);
                        let start = map.round_robin_start % n;
                        map.round_robin_start = start + 1;

                        let keys: Vec<QueueKey> = map.queues.keys().copied().collect();
                        for i in 0..n {
                            let key = keys[(start + i) % n];
                            if let Some(queue) = map.queues.get_mut(&key) {
                                queue.get_available(out, Some(slice));
                            }
                        }
                    }
                }
            }
        }
        if let Some(exactly_once) = &self.exactly_once {
            exactly_once.get_available(out, limit);
        }
    }

    /// Finalise a dispatched item (sink completion path).
    pub fn remove_item(&self, key: QueueKey, item: &SenderQueueItem) -> bool {
        {
            let mut map = self.queues.lock().unwrap();
            if let Some(queue) = map.queues.get_mut(&key) {
                return queue.remove(item.id());
            }
        }
        self.exactly_once
            .as_ref()
            .is_some_and(|exactly_once| exactly_once.remove(key, item.id()))
    }

    /// Release one permit in each concurrency scope of the queue.
    pub fn decrease_concurrency(&self, key: QueueKey) {
        let mut map = self.queues.lock().unwrap();
        if let Some(queue) = map.queues.get_mut(&key) {
            queue.release_concurrency();
        }
    }

    /// Rebind the pipeline back-reference on every buffered item of `key`.
    pub fn set_pipeline_for_items(&self, key: QueueKey, pipeline: &Arc<PipelineContext>) {
        {
            let mut map = self.queues.lock().unwrap();
            if let Some(queue) = map.queues.get_mut(&key) {
                queue.set_pipeline_for_items(pipeline);
                return;
            }
        }
        if let Some(exactly_once) = &self.exactly_once {
            exactly_once.set_pipeline_for_items(key, pipeline);
        }
    }

    pub fn set_backpressure_callback(&self, key: QueueKey, callback: BackpressureCallback) -> bool {
        self.with_queue(key, |queue| queue.set_backpressure_callback(callback))
            .is_some()
    }

    pub fn is_all_empty(&self) -> bool {
        {
            let map = self.queues.lock().unwrap();
            if map.queues.values().any(|queue| !queue.is_empty()) {
                return false;
            }
        }
        self.exactly_once
            .as_ref()
            .map_or(true, |exactly_once| exactly_once.is_all_empty())
    }

    /// Refresh every queue's byte budget; the dispatch worker calls this
    /// once per cycle.
    pub fn refill_rate_limiters(&self, now: Instant) {
        let mut map = self.queues.lock().unwrap();
        for queue in map.queues.values_mut() {
            queue.refill_rate_limiter(now);
        }
    }

    /// Destroy tombstoned queues that are empty and past the grace period,
    /// returning their keys to the allocator. Non-empty tombstoned queues
    /// keep draining and are revisited next sweep.
    pub fn clear_unused_queues(&self) {
        self.sweep(Instant::now());
    }

    fn sweep(&self, now: Instant) {
        let mut tombstones = self.tombstones.lock().unwrap();
        tombstones.retain(|key, deleted_at| {
            if now.saturating_duration_since(*deleted_at) < self.gc_threshold {
                return true;
            }
            let mut map = self.queues.lock().unwrap();
            let Some(queue) = map.queues.get(key) else {
                // A tombstone without a queue means bookkeeping broke
                // somewhere upstream; surface it and drop the entry.
                warn!(%key, "tombstoned queue missing from the registry");
                return false;
            };
            if !queue.is_empty() {
                return true;
            }
            map.queues.remove(key);
            drop(map);
            self.allocator.release(*key);
            false
        });
    }

    /// Block until a `trigger` lands or the timeout elapses. Edge-triggered:
    /// a trigger observed by one `wait` is consumed by it.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake.wait(timeout)
    }

    /// Wake the dispatch worker.
    pub fn trigger(&self) {
        self.wake.trigger();
    }

    pub fn queue_stats(&self, key: QueueKey) -> Option<QueueStats> {
        let tombstoned = self.is_marked_deleted(key);
        let map = self.queues.lock().unwrap();
        map.queues.get(&key).map(|queue| QueueStats {
            pending: queue.pending_len(),
            sending: queue.sending(),
            capacity: queue.capacity(),
            low_watermark: queue.low_watermark(),
            high_watermark: queue.high_watermark(),
            tombstoned,
        })
    }

    pub fn stats(&self) -> RegistryStats {
        let tombstoned = self.tombstones.lock().unwrap().len();
        let map = self.queues.lock().unwrap();
        RegistryStats {
            queues: map.queues.len(),
            tombstoned,
            waiting_items: map.queues.values().map(|queue| queue.pending_len()).sum(),
        }
    }

    /// Pending items across all queues, for the waiting-items gauge.
    pub fn waiting_item_count(&self) -> usize {
        self.stats().waiting_items
    }
}
