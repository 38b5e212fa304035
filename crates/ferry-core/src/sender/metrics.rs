use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// OTel instruments for the dispatch loop. Created once when the worker
/// starts; no-op when no meter provider is installed.
pub struct DispatchMetrics {
    pub in_items: Counter<u64>,
    pub in_bytes: Counter<u64>,
    pub in_raw_bytes: Counter<u64>,
    pub out_items: Counter<u64>,
    pub send_delay_ms: Counter<u64>,
    pub waiting_items: Gauge<u64>,
    pub last_run_time: Gauge<u64>,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("ferry");
        Self::from_meter(&meter)
    }

    /// Create instruments from a specific meter (tests use an in-memory
    /// exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            in_items: meter
                .u64_counter("ferry.dispatch.in_items")
                .with_description("Items drained from sender queues")
                .build(),
            in_bytes: meter
                .u64_counter("ferry.dispatch.in_bytes")
                .with_description("Payload bytes drained from sender queues")
                .build(),
            in_raw_bytes: meter
                .u64_counter("ferry.dispatch.in_raw_bytes")
                .with_description("Pre-encoding bytes drained from sender queues")
                .build(),
            out_items: meter
                .u64_counter("ferry.dispatch.out_items")
                .with_description("Items handed to sinks")
                .build(),
            send_delay_ms: meter
                .u64_counter("ferry.dispatch.send_delay_ms")
                .with_description("Total queue-to-sink latency")
                .build(),
            waiting_items: meter
                .u64_gauge("ferry.dispatch.waiting_items")
                .with_description("Items currently pending across all queues")
                .build(),
            last_run_time: meter
                .u64_gauge("ferry.dispatch.last_run_time")
                .with_description("Unix time of the last dispatch cycle")
                .build(),
        }
    }

    pub fn record_in_item(&self, sink: &str, wire_bytes: u64, raw_bytes: u64) {
        let attrs = [KeyValue::new("sink", sink.to_string())];
        self.in_items.add(1, &attrs);
        self.in_bytes.add(wire_bytes, &attrs);
        self.in_raw_bytes.add(raw_bytes, &attrs);
    }

    pub fn record_out_item(&self, sink: &str, delay_ms: u64) {
        let attrs = [KeyValue::new("sink", sink.to_string())];
        self.out_items.add(1, &attrs);
        self.send_delay_ms.add(delay_ms, &attrs);
    }

    pub fn set_waiting_items(&self, count: u64) {
        self.waiting_items.record(count, &[]);
    }

    pub fn set_last_run_time(&self, unix_secs: u64) {
        self.last_run_time.record(unix_secs, &[]);
    }
}
