//! Configuration consumed by [`LoggingSystem`](crate::LoggingSystem).
//!
//! [`LokiConfigBuilder`] validates user input and applies defaults before
//! producing a [`LokiConfig`]. The config is plain data; the system copies
//! what it needs at construction time.

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(ConfigError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

mod builder;
mod file;

use std::collections::BTreeMap;
use std::time::Duration;

use crate::codec::HEADER_LEN;
use crate::error::ConfigError;
use crate::rate_limited_warner::DEFAULT_WARN_INTERVAL;
use crate::ring_buffer::BufferAllocation;

pub use builder::LokiConfigBuilder;

/// Default push endpoint path.
pub const DEFAULT_PUSH_PATH: &str = "/loki/api/v1/push";
/// Default ring buffer size.
pub const DEFAULT_BUFFER_SIZE_BYTES: usize = 32 * 1024 * 1024;
/// Default connection timeout applied when establishing HTTP connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout applied to HTTP requests.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
/// Default upper bound on a batch's estimated wire size.
pub const DEFAULT_BATCH_MAX_BYTES: usize = 1024 * 1024;
/// Default upper bound on entries per batch.
pub const DEFAULT_BATCH_MAX_ENTRIES: usize = 10_000;
/// Default maximum age of the oldest entry in an open batch.
pub const DEFAULT_BATCH_MAX_WAIT: Duration = Duration::from_secs(1);
/// Default base delay for exponential backoff retries.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Default maximum delay for exponential backoff retries.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(5);
/// Default longest time the worker sleeps waiting for new entries.
pub const DEFAULT_DRAIN_WAIT: Duration = Duration::from_millis(250);
/// Default number of distinct label sets per system.
pub const DEFAULT_MAX_LABEL_SETS: usize = 256;
/// Default deadline used when a system is dropped without `close`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Smallest ring that can hold a frame with a short payload.
pub const MIN_BUFFER_SIZE_BYTES: usize = HEADER_LEN * 4;

/// Authentication configuration for push requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AuthConfig {
    /// No authentication.
    #[default]
    None,
    /// HTTP Basic authentication with username and password.
    Basic { username: String, password: String },
    /// Bearer token authentication.
    Bearer { token: String },
}

/// Thresholds that seal an open batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPolicy {
    pub max_bytes: usize,
    pub max_entries: usize,
    pub max_wait: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_BATCH_MAX_BYTES,
            max_entries: DEFAULT_BATCH_MAX_ENTRIES,
            max_wait: DEFAULT_BATCH_MAX_WAIT,
        }
    }
}

/// Exponential backoff policy between delivery attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Validated configuration for one logging system.
#[derive(Clone, Debug)]
pub struct LokiConfig {
    pub host: String,
    pub port: u16,
    /// Use `https` instead of `http`.
    pub use_tls: bool,
    /// Push endpoint path, starting with `/`.
    pub path: String,
    /// Extra headers sent with every push, e.g. `X-Scope-OrgID`.
    pub headers: BTreeMap<String, String>,
    pub auth: AuthConfig,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Additional attempts after the first for transient failures.
    pub max_retries: u32,
    pub buffer_size_bytes: usize,
    pub allocation: BufferAllocation,
    pub batch: BatchPolicy,
    pub backoff: BackoffPolicy,
    pub drain_wait: Duration,
    pub max_label_sets: usize,
    pub shutdown_timeout: Duration,
    /// Interval between rate-limited warnings.
    pub warn_interval: Duration,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 3100,
            use_tls: false,
            path: DEFAULT_PUSH_PATH.into(),
            headers: BTreeMap::new(),
            auth: AuthConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_retries: 0,
            buffer_size_bytes: DEFAULT_BUFFER_SIZE_BYTES,
            allocation: BufferAllocation::default(),
            batch: BatchPolicy::default(),
            backoff: BackoffPolicy::default(),
            drain_wait: DEFAULT_DRAIN_WAIT,
            max_label_sets: DEFAULT_MAX_LABEL_SETS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

impl LokiConfig {
    /// Full push URL derived from scheme, host, port and path.
    pub fn push_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
    }

    /// Reject values the logging system cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig("host is required".into()));
        }
        ensure_positive!(self.port, "port")?;
        if !self.path.starts_with('/') {
            return Err(ConfigError::InvalidConfig(format!(
                "path must start with '/': {:?}",
                self.path
            )));
        }
        if self.buffer_size_bytes < MIN_BUFFER_SIZE_BYTES {
            return Err(ConfigError::InvalidConfig(format!(
                "buffer_size_bytes must be at least {MIN_BUFFER_SIZE_BYTES}"
            )));
        }
        ensure_positive!(self.batch.max_bytes, "batch_max_bytes")?;
        ensure_positive!(self.batch.max_entries, "batch_max_entries")?;
        ensure_positive!(self.batch.max_wait.as_millis(), "batch_max_wait_ms")?;
        ensure_positive!(self.backoff.base.as_millis(), "backoff_base_ms")?;
        if self.backoff.cap < self.backoff.base {
            return Err(ConfigError::InvalidConfig(format!(
                "backoff_cap_ms ({}) must not be less than backoff_base_ms ({})",
                self.backoff.cap.as_millis(),
                self.backoff.base.as_millis()
            )));
        }
        ensure_positive!(self.drain_wait.as_millis(), "drain_wait_ms")?;
        ensure_positive!(self.max_label_sets, "max_label_sets")?;
        Ok(())
    }
}
