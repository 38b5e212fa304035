use tracing_subscriber::EnvFilter;

/// Install the agent's tracing subscriber.
///
/// Interactive (debug) builds log human-readable lines; daemonized release
/// builds emit JSON so the agent's own logs can be shipped like any other
/// telemetry. `FERRY_LOG` overrides the filter, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    }
}
