use crate::key::QueueKey;

/// Admission errors for sender-queue pushes. Queue and registry operations
/// never panic; rejection is always an explicit status the producer can
/// react to (retry with backoff, buffer upstream, or drop).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The queue is at or above its high watermark. Transient: retry once
    /// the dispatch loop has drained below the low watermark.
    #[error("sender queue is at its high watermark")]
    QueueFull,

    /// No sender queue is bound to this key and no exactly-once registry
    /// claimed it either.
    #[error("no sender queue for key {0}")]
    UnknownKey(QueueKey),
}

/// Errors from the dispatch worker lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to spawn dispatch worker: {0}")]
    WorkerSpawn(String),

    #[error("dispatch command channel disconnected")]
    ChannelDisconnected,

    #[error("dispatch worker panicked")]
    WorkerPanicked,
}

pub type PushResult = std::result::Result<(), PushError>;
