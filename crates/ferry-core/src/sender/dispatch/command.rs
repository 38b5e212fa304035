/// Control messages for the dispatch worker, sent from the owning
/// [`Dispatcher`](super::Dispatcher) over the bounded command channel.
#[derive(Debug)]
pub enum DispatchCommand {
    /// Swap the global send-rate ceiling (bytes per second, 0 = unlimited)
    /// without restarting the worker.
    UpdateFlowControl { max_send_bytes_per_sec: u64 },

    /// Flush whatever the queues will currently release, then exit.
    Shutdown,
}
