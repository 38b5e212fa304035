pub mod concurrency;
pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod queue;
pub mod rate;
pub mod registry;
pub mod stats;

pub use concurrency::ConcurrencyLimiter;
pub use config::{QueueParams, SenderConfig};
pub use dispatch::{DispatchCommand, Dispatcher};
pub use queue::{BackpressureCallback, SenderQueue};
pub use rate::RateLimiter;
pub use registry::QueueRegistry;
pub use stats::{QueueStats, RegistryStats};
