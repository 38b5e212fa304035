use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use uuid::Uuid;

use crate::key::QueueKey;
use crate::pipeline::PipelineContext;
use crate::sink::SinkKind;

/// One outbound batch awaiting send. Built by a flusher, buffered in a
/// sender queue, handed to a sink by the dispatch loop.
///
/// Immutable once constructed except for the attempt counter and the
/// pipeline back-reference, both of which are touched while the item is
/// shared between the queue, the dispatch loop and a sink.
#[derive(Debug)]
pub struct SenderQueueItem {
    id: Uuid,
    key: QueueKey,
    sink: SinkKind,
    payload: Vec<u8>,
    /// Size of the batch before wire encoding, for throughput accounting.
    raw_size: usize,
    attempts: AtomicU32,
    enqueued_at: Instant,
    /// Weak so a torn-down pipeline never outlives its config reload; see
    /// [`SenderQueueItem::rebind_pipeline`].
    pipeline: RwLock<Weak<PipelineContext>>,
}

impl SenderQueueItem {
    pub fn new(
        key: QueueKey,
        sink: SinkKind,
        payload: Vec<u8>,
        raw_size: usize,
        pipeline: &Arc<PipelineContext>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            key,
            sink,
            payload,
            raw_size,
            attempts: AtomicU32::new(0),
            enqueued_at: Instant::now(),
            pipeline: RwLock::new(Arc::downgrade(pipeline)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> QueueKey {
        self.key
    }

    pub fn sink(&self) -> SinkKind {
        self.sink
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Wire size of the payload, the unit the rate limiter meters.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn raw_size(&self) -> usize {
        self.raw_size
    }

    /// First-enqueue time; survives retries.
    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Bump the attempt counter when the item is handed to a sink.
    pub fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The owning pipeline, if it is still alive.
    pub fn pipeline(&self) -> Option<Arc<PipelineContext>> {
        self.pipeline.read().unwrap().upgrade()
    }

    /// Point the back-reference at a new pipeline instance. Tolerates items
    /// whose previous pipeline was already dropped mid-flight.
    pub fn rebind_pipeline(&self, pipeline: &Arc<PipelineContext>) {
        *self.pipeline.write().unwrap() = Arc::downgrade(pipeline);
    }
}
