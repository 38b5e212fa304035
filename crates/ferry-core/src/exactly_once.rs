use std::sync::Arc;

use uuid::Uuid;

use crate::error::PushResult;
use crate::item::SenderQueueItem;
use crate::key::QueueKey;
use crate::pipeline::PipelineContext;

/// Parallel registry for destinations with exactly-once delivery. Items for
/// keys the normal registry does not know are routed here; its errors come
/// back through [`crate::sender::QueueRegistry::push`] unchanged.
///
/// Only the interface lives in this crate; the durable implementation
/// (persistent log, ack tracking) is a separate collaborator.
pub trait ExactlyOnceRegistry: Send + Sync {
    fn push_sender(&self, key: QueueKey, item: SenderQueueItem) -> PushResult;

    /// Append available items to `out`, up to `limit` (`None` = unbounded).
    fn get_available(&self, out: &mut Vec<Arc<SenderQueueItem>>, limit: Option<usize>);

    fn remove(&self, key: QueueKey, id: Uuid) -> bool;

    fn set_pipeline_for_items(&self, key: QueueKey, pipeline: &Arc<PipelineContext>);

    fn is_all_empty(&self) -> bool;
}
