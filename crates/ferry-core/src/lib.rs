pub mod error;
pub mod exactly_once;
pub mod item;
pub mod key;
pub mod pipeline;
pub mod sender;
pub mod sink;
pub mod telemetry;

pub use error::{DispatchError, PushError, PushResult};
pub use exactly_once::ExactlyOnceRegistry;
pub use item::SenderQueueItem;
pub use key::{KeyAllocator, QueueKey};
pub use pipeline::PipelineContext;
pub use sender::{
    ConcurrencyLimiter, Dispatcher, QueueRegistry, RateLimiter, SenderConfig, SenderQueue,
};
pub use sink::{Sink, SinkKind};
