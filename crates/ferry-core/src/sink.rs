use std::sync::Arc;

use crate::item::SenderQueueItem;

/// Transport family an item is routed to. Stamped on the item by the
/// flusher that produced it; the dispatch loop uses it to pick a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Http,
}

impl SinkKind {
    /// Stable label for logs and metric attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Http => "http",
        }
    }
}

/// A transport that performs the actual I/O for dispatched items.
///
/// Contract: for every item received through `push`, the sink must, on
/// success or terminal failure, call
/// [`crate::sender::QueueRegistry::remove_item`] and
/// [`crate::sender::QueueRegistry::decrease_concurrency`] exactly once.
/// Retry and dead-letter policy live entirely inside the sink.
pub trait Sink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Hand over an item. `with_limit` asks the sink to honour its own
    /// flow control; the dispatch loop always sets it.
    fn push(&self, item: Arc<SenderQueueItem>, with_limit: bool);
}
