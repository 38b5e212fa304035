use super::*;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub(super) fn test_config() -> SenderConfig {
    SenderConfig {
        poll_interval_ms: 10,
        command_channel_capacity: 16,
        ..Default::default()
    }
}

pub(super) fn ctx() -> Arc<PipelineContext> {
    Arc::new(PipelineContext::new("cfg", "proj", "store"))
}

pub(super) fn test_registry(config: &SenderConfig) -> (Arc<QueueRegistry>, Arc<KeyAllocator>) {
    let allocator = Arc::new(KeyAllocator::new());
    let registry = Arc::new(QueueRegistry::new(config, Arc::clone(&allocator), None));
    (registry, allocator)
}

pub(super) fn make_queue(
    registry: &QueueRegistry,
    allocator: &KeyAllocator,
    destination: &str,
) -> QueueKey {
    let key = allocator.acquire("pipeline-1", destination);
    registry.create_queue(key, destination, ctx(), HashMap::new(), 0);
    key
}

pub(super) fn test_item(key: QueueKey, bytes: usize) -> SenderQueueItem {
    SenderQueueItem::new(key, SinkKind::Http, vec![0u8; bytes], bytes, &ctx())
}

/// Sink double that records every hand-off and, when built with
/// `completing`, finalises items immediately the way a real transport does
/// on completion.
pub(super) struct MockSink {
    received: Mutex<Vec<Arc<SenderQueueItem>>>,
    complete_via: Option<Arc<QueueRegistry>>,
}

impl MockSink {
    pub(super) fn recording() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            complete_via: None,
        })
    }

    pub(super) fn completing(registry: Arc<QueueRegistry>) -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            complete_via: Some(registry),
        })
    }

    pub(super) fn received_ids(&self) -> Vec<Uuid> {
        self.received.lock().unwrap().iter().map(|i| i.id()).collect()
    }

    pub(super) fn received_items(&self) -> Vec<Arc<SenderQueueItem>> {
        self.received.lock().unwrap().clone()
    }

    pub(super) fn len(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

impl Sink for MockSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Http
    }

    fn push(&self, item: Arc<SenderQueueItem>, _with_limit: bool) {
        self.received.lock().unwrap().push(Arc::clone(&item));
        if let Some(registry) = &self.complete_via {
            registry.remove_item(item.key(), &item);
            registry.decrease_concurrency(item.key());
        }
    }
}

/// Build a worker without spawning its thread, so tests drive the loop by
/// hand.
pub(super) fn test_worker(
    config: &SenderConfig,
    registry: Arc<QueueRegistry>,
    sinks: Vec<Arc<dyn Sink>>,
) -> (DispatchWorker, crossbeam_channel::Sender<DispatchCommand>) {
    let (tx, rx) = crossbeam_channel::bounded(config.command_channel_capacity);
    (DispatchWorker::new(config, registry, sinks, rx), tx)
}
