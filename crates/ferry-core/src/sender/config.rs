use serde::Deserialize;

/// Send-side configuration, deserializable from the agent's TOML config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Per-queue capacity. Pending plus in-flight items never exceed this.
    pub queue_capacity: usize,
    /// Low watermark: backpressure on a queue is released once its depth
    /// drops below this. Defaults to the capacity.
    pub low_watermark: Option<usize>,
    /// High watermark: pushes are rejected at or above this depth.
    /// Defaults to the capacity.
    pub high_watermark: Option<usize>,
    /// Minimum tombstone age before a deleted queue is destroyed.
    pub gc_threshold_secs: u64,
    /// How long the dispatch worker parks waiting for a wake-up.
    pub poll_interval_ms: u64,
    /// Global per-cycle drain limit. `None` drains every queue fully.
    pub batch_limit: Option<usize>,
    /// Global ceiling on bytes handed to sinks per second. 0 = unlimited.
    pub max_send_bytes_per_sec: u64,
    /// Capacity of the dispatch worker's control channel.
    pub command_channel_capacity: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 15,
            low_watermark: None,
            high_watermark: None,
            gc_threshold_secs: 30,
            poll_interval_ms: 1000,
            batch_limit: None,
            max_send_bytes_per_sec: 0,
            command_channel_capacity: 16,
        }
    }
}

impl SenderConfig {
    /// Effective per-queue sizing with watermarks clamped to
    /// `0 < low <= high <= capacity`.
    pub fn queue_params(&self) -> QueueParams {
        let capacity = self.queue_capacity.max(1);
        let high = self.high_watermark.unwrap_or(capacity).clamp(1, capacity);
        let low = self.low_watermark.unwrap_or(capacity).clamp(1, high);
        QueueParams {
            capacity,
            low_watermark: low,
            high_watermark: high,
        }
    }
}

/// Resolved sizing for one sender queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueParams {
    pub capacity: usize,
    pub low_watermark: usize,
    pub high_watermark: usize,
}
