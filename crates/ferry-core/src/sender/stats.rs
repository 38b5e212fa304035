/// Point-in-time snapshot of one sender queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub sending: usize,
    pub capacity: usize,
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub tombstoned: bool,
}

/// Aggregate snapshot across the registry, feeding the dispatch gauges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub queues: usize,
    pub tombstoned: usize,
    /// Pending items across all queues (excludes in-flight).
    pub waiting_items: usize,
}
