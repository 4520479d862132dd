use std::time::Duration;

/// Runtime-level configuration for the dispatch pipeline.
///
/// Controls identity defaults, invocation limits, nested dispatch depth,
/// the publish queue, and shutdown draining.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Logical node name, recorded on dispatch spans.
    pub node_id: String,
    /// Source address given to root requests whose transport did not supply one.
    pub source_address: String,
    /// Timeout applied when neither the caller nor the endpoint sets one.
    pub default_timeout: Option<Duration>,
    /// Maximum number of concurrent handler invocations before load shedding.
    pub max_concurrent_invocations: u32,
    /// Maximum nesting of `send`/`publish` calls issued from handlers.
    pub max_dispatch_depth: usize,
    /// Successful dispatches under this path prefix are not logged.
    pub system_path_prefix: String,
    /// Capacity of the bounded event publish queue.
    pub event_queue_capacity: usize,
    /// How long shutdown waits for in-flight root dispatches.
    pub drain_timeout: Duration,
    pub log: LogConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_id: "local".to_string(),
            source_address: "127.0.0.1".to_string(),
            default_timeout: None,
            max_concurrent_invocations: 1024,
            max_dispatch_depth: 32,
            system_path_prefix: "system/".to_string(),
            event_queue_capacity: 256,
            drain_timeout: Duration::from_secs(10),
            log: LogConfig::default(),
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}
