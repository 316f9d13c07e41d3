//! Shared configuration and label fixtures for integration tests.

use std::sync::Arc;

use femtologging_loki::{LabelSet, LokiConfigBuilder, LoggingSystem, PushTransport};
use rstest::fixture;

/// Builder tuned for tests: small heap buffer, quick batching and retries.
pub fn fast_builder(port: u16) -> LokiConfigBuilder {
    LokiConfigBuilder::new()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_buffer_size_bytes(64 * 1024)
        .with_off_heap_buffer(false)
        .with_batch_max_wait_ms(20)
        .with_drain_wait_ms(10)
        .with_backoff_base_ms(1)
        .with_backoff_cap_ms(5)
        .with_connect_timeout_ms(1_000)
        .with_read_timeout_ms(5_000)
}

/// Start a system that pushes through `transport`.
pub fn started_with(
    builder: LokiConfigBuilder,
    transport: Arc<dyn PushTransport>,
) -> LoggingSystem {
    let config = builder.build().expect("valid test configuration");
    let system = LoggingSystem::with_transport(config, transport).expect("system");
    system.start().expect("start");
    system
}

/// Start a system that pushes over HTTP to `127.0.0.1:port`.
pub fn started_http(builder: LokiConfigBuilder) -> LoggingSystem {
    let config = builder.build().expect("valid test configuration");
    let system = LoggingSystem::new(config).expect("system");
    system.start().expect("start");
    system
}

#[fixture]
pub fn app_labels() -> LabelSet {
    LabelSet::from_pairs([("app", "x")]).expect("valid labels")
}
