//! Buffered, asynchronous log shipping to Grafana Loki.
//!
//! Producers hand already-rendered log lines and a [`LabelSet`] to a
//! [`Logger`]. Lines are framed into a fixed-capacity [`RingBuffer`] without
//! blocking on I/O; a single background worker drains the buffer, groups
//! entries into per-stream batches, and pushes them to Loki over HTTP with
//! bounded retries. [`LoggingSystem::close`] drains what it can before a
//! deadline and reports the remainder through a callback.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use femtologging_loki::{LabelSet, LokiConfigBuilder, LoggingSystem};
//!
//! let config = LokiConfigBuilder::new()
//!     .with_host("localhost")
//!     .with_port(3100)
//!     .build()?;
//! let system = LoggingSystem::new(config)?;
//! system.start()?;
//!
//! let labels = LabelSet::from_pairs([("app", "checkout")])?;
//! system.create_logger().log(1_700_000_000_000, &labels, b"order accepted");
//!
//! system.close(Duration::from_secs(5), |unit| {
//!     eprintln!("unit {} left {} entries undelivered", unit.id, unit.entries);
//! });
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod batcher;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod rate_limited_warner;
pub mod ring_buffer;
pub mod system;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

pub use batcher::{Batch, Batcher, UnitId};
pub use codec::LogEntry;
pub use config::{AuthConfig, BackoffPolicy, BatchPolicy, LokiConfig, LokiConfigBuilder};
pub use delivery::{DeliveryClient, DeliveryOutcome, PushTransport, UreqTransport};
pub use error::{
    CodecError, ConfigError, DeliveryError, LabelError, LogError, StateError, TransportError,
};
pub use labels::{LabelRegistry, LabelSet, LabelSetId};
pub use metrics::{Metrics, MetricsSnapshot};
pub use ring_buffer::{BufferAllocation, RingBuffer};
pub use system::{Logger, LoggingSystem, State, UnflushedUnit};
