pub mod command;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::item::SenderQueueItem;
use crate::sink::{Sink, SinkKind};

use super::config::SenderConfig;
use super::metrics::DispatchMetrics;
use super::registry::QueueRegistry;

pub use command::DispatchCommand;

/// Owns the dispatch worker thread and its inbound command channel.
///
/// Producers talk to the registry directly; the dispatcher only carries
/// control traffic (flow-control updates, shutdown). The worker parks on
/// the registry's wake signal between batches.
pub struct Dispatcher {
    command_tx: crossbeam_channel::Sender<DispatchCommand>,
    registry: Arc<QueueRegistry>,
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the worker on a dedicated OS thread.
    #[tracing::instrument(skip_all)]
    pub fn new(
        config: &SenderConfig,
        registry: Arc<QueueRegistry>,
        sinks: Vec<Arc<dyn Sink>>,
    ) -> Result<Self, DispatchError> {
        let (tx, rx) = crossbeam_channel::bounded::<DispatchCommand>(
            config.command_channel_capacity,
        );

        let mut worker = DispatchWorker::new(config, Arc::clone(&registry), sinks, rx);
        let handle = thread::Builder::new()
            .name("ferry-dispatch".to_string())
            .spawn(move || worker.run())
            .map_err(|e| DispatchError::WorkerSpawn(e.to_string()))?;

        info!("dispatcher started");

        Ok(Self {
            command_tx: tx,
            registry,
            worker_thread: Some(handle),
        })
    }

    /// Swap the global send-rate ceiling at runtime.
    pub fn update_flow_control(&self, max_send_bytes_per_sec: u64) -> Result<(), DispatchError> {
        self.command_tx
            .send(DispatchCommand::UpdateFlowControl {
                max_send_bytes_per_sec,
            })
            .map_err(|_| DispatchError::ChannelDisconnected)?;
        self.registry.trigger();
        Ok(())
    }

    /// Graceful shutdown: flush what the queues will release, then join the
    /// worker. Items already handed to sinks complete normally.
    #[tracing::instrument(skip_all)]
    pub fn shutdown(mut self) -> Result<(), DispatchError> {
        info!("initiating dispatcher shutdown");

        let _ = self.command_tx.send(DispatchCommand::Shutdown);
        self.registry.trigger();

        if let Some(handle) = self.worker_thread.take() {
            handle.join().map_err(|_| DispatchError::WorkerPanicked)?;
        }

        info!("dispatcher shutdown complete");
        Ok(())
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // If shutdown wasn't called explicitly, attempt to stop the worker
        if self.worker_thread.is_some() {
            let _ = self.command_tx.send(DispatchCommand::Shutdown);
            self.registry.trigger();
            if let Some(handle) = self.worker_thread.take() {
                let _ = handle.join();
            }
        }
    }
}

/// The dispatch loop proper. Single-threaded; every mutable piece of state
/// lives here, shared state is reached through the registry.
struct DispatchWorker {
    registry: Arc<QueueRegistry>,
    sinks: HashMap<SinkKind, Arc<dyn Sink>>,
    commands: Receiver<DispatchCommand>,
    poll_interval: Duration,
    batch_limit: Option<usize>,
    flow: SendFlowControl,
    metrics: DispatchMetrics,
    running: bool,
}

impl DispatchWorker {
    fn new(
        config: &SenderConfig,
        registry: Arc<QueueRegistry>,
        sinks: Vec<Arc<dyn Sink>>,
        commands: Receiver<DispatchCommand>,
    ) -> Self {
        let sinks = sinks
            .into_iter()
            .map(|sink| (sink.kind(), sink))
            .collect();
        Self {
            registry,
            sinks,
            commands,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            batch_limit: config.batch_limit,
            flow: SendFlowControl::new(config.max_send_bytes_per_sec),
            metrics: DispatchMetrics::new(),
            running: true,
        }
    }

    fn run(&mut self) {
        info!("dispatch worker started");

        while self.running {
            self.registry.wait(self.poll_interval);
            self.drain_commands();
            if !self.running {
                break;
            }
            self.run_cycle();
        }

        // Hand over whatever the limiters will still release; items already
        // at a sink are never cancelled.
        self.flush_remaining();

        info!("dispatch worker stopped");
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(DispatchCommand::UpdateFlowControl {
                    max_send_bytes_per_sec,
                }) => {
                    debug!(max_send_bytes_per_sec, "flow control updated");
                    self.flow.set_rate(max_send_bytes_per_sec);
                }
                Ok(DispatchCommand::Shutdown) => {
                    info!("shutdown command received");
                    self.running = false;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("command channel disconnected, shutting down");
                    self.running = false;
                    break;
                }
            }
        }
    }

    /// One dispatch cycle: refresh byte budgets, drain a fair batch, hand
    /// items to their sinks, then do the periodic housekeeping.
    fn run_cycle(&mut self) {
        self.registry.refill_rate_limiters(Instant::now());

        let mut batch = Vec::new();
        self.registry.get_available_items(&mut batch, self.batch_limit);
        for item in batch {
            self.dispatch(item);
        }

        self.registry.clear_unused_queues();
        if let Some(pause) = self.flow.pause_needed(Instant::now()) {
            debug!(?pause, "send flow control engaged");
            thread::sleep(pause);
        }
        self.record_gauges();
    }

    fn dispatch(&mut self, item: Arc<SenderQueueItem>) {
        let sink_label = item.sink().as_str();
        self.metrics
            .record_in_item(sink_label, item.size() as u64, item.raw_size() as u64);

        let Some(sink) = self.sinks.get(&item.sink()) else {
            // No transport bound for this kind; finalise so the item does
            // not sit in flight forever.
            warn!(key = %item.key(), sink = sink_label, "no sink registered, dropping item");
            self.registry.remove_item(item.key(), &item);
            self.registry.decrease_concurrency(item.key());
            return;
        };

        let attempt = item.begin_attempt();
        let delay_ms = item.enqueued_at().elapsed().as_millis() as u64;
        debug!(key = %item.key(), attempt, bytes = item.size(), "dispatching item");

        self.flow.add(item.size() as u64);
        sink.push(Arc::clone(&item), true);
        self.metrics.record_out_item(sink_label, delay_ms);
    }

    fn flush_remaining(&mut self) {
        let mut batch = Vec::new();
        self.registry.get_available_items(&mut batch, None);
        if !batch.is_empty() {
            info!(count = batch.len(), "flushing remaining items before exit");
        }
        for item in batch {
            self.dispatch(item);
        }
    }

    fn record_gauges(&self) {
        self.metrics
            .set_waiting_items(self.registry.waiting_item_count() as u64);
        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.metrics.set_last_run_time(unix_secs);
    }
}

/// Global ceiling on bytes handed to sinks, accounted over one-second
/// windows. Separate from the per-queue token buckets: this caps the whole
/// process regardless of how many destinations are active.
struct SendFlowControl {
    max_bytes_per_sec: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl SendFlowControl {
    const WINDOW: Duration = Duration::from_secs(1);

    fn new(max_bytes_per_sec: u64) -> Self {
        Self {
            max_bytes_per_sec,
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    fn set_rate(&mut self, max_bytes_per_sec: u64) {
        self.max_bytes_per_sec = max_bytes_per_sec;
    }

    fn add(&mut self, bytes: u64) {
        self.window_bytes += bytes;
    }

    /// How long to stay off the wire, if the current window's budget is
    /// already spent. Rolls the window over once it has elapsed.
    fn pause_needed(&mut self, now: Instant) -> Option<Duration> {
        if self.max_bytes_per_sec == 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= Self::WINDOW {
            self.window_start = now;
            self.window_bytes = 0;
            return None;
        }
        if self.window_bytes >= self.max_bytes_per_sec {
            Some(Self::WINDOW - elapsed)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests;
