//! Builder for [`LokiConfig`].
//!
//! Every setter stores an override; [`LokiConfigBuilder::build`] fills in
//! defaults and hands the result to [`LokiConfig::validate`].

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ring_buffer::BufferAllocation;

use super::{
    AuthConfig, BackoffPolicy, BatchPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
    LokiConfig,
};

const BYTES_IN_MEGABYTE: usize = 1024 * 1024;

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

fn millis(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}

/// A zero timeout selects the default.
fn timeout_or_default(value: Option<u64>, default: Duration) -> Duration {
    match value {
        None | Some(0) => default,
        Some(ms) => Duration::from_millis(ms),
    }
}

/// Builder for constructing [`LokiConfig`] values.
#[derive(Clone, Debug, Default)]
pub struct LokiConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    use_tls: bool,
    path: Option<String>,
    headers: BTreeMap<String, String>,
    auth: Option<AuthConfig>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    buffer_size_bytes: Option<usize>,
    use_off_heap_buffer: Option<bool>,
    batch_max_bytes: Option<usize>,
    batch_max_entries: Option<usize>,
    batch_max_wait_ms: Option<u64>,
    backoff_base_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
    drain_wait_ms: Option<u64>,
    max_label_sets: Option<usize>,
    shutdown_timeout_ms: Option<u64>,
    warn_interval_ms: Option<u64>,
}

impl LokiConfigBuilder {
    /// Create a new builder with no endpoint configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Loki host name or address (required).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the push endpoint path. Defaults to `/loki/api/v1/push`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Use `https` for push requests.
    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Add a single custom HTTP header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Configure HTTP Basic authentication.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth = Some(AuthConfig::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Configure Bearer token authentication.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(AuthConfig::Bearer {
            token: token.into(),
        });
        self
    }

    /// Set the ring buffer size in whole megabytes.
    pub fn with_buffer_size_megabytes(mut self, megabytes: usize) -> Self {
        self.buffer_size_bytes = Some(megabytes.saturating_mul(BYTES_IN_MEGABYTE));
        self
    }

    option_setter!(
        #[doc = "Set the Loki port (required)."]
        with_port,
        port,
        u16
    );
    option_setter!(
        #[doc = "Set the connect timeout in milliseconds. Zero selects the default."]
        with_connect_timeout_ms,
        connect_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the read timeout in milliseconds. Zero selects the default."]
        with_read_timeout_ms,
        read_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the number of retries after the first attempt."]
        with_max_retries,
        max_retries,
        u32
    );
    option_setter!(
        #[doc = "Set the ring buffer size in bytes."]
        with_buffer_size_bytes,
        buffer_size_bytes,
        usize
    );
    option_setter!(
        #[doc = "Pre-fault the ring buffer storage (default `true`)."]
        with_off_heap_buffer,
        use_off_heap_buffer,
        bool
    );
    option_setter!(
        #[doc = "Seal a batch once its estimated wire size reaches this many bytes."]
        with_batch_max_bytes,
        batch_max_bytes,
        usize
    );
    option_setter!(
        #[doc = "Seal a batch once it holds this many entries."]
        with_batch_max_entries,
        batch_max_entries,
        usize
    );
    option_setter!(
        #[doc = "Seal a batch once its oldest entry is this many milliseconds old."]
        with_batch_max_wait_ms,
        batch_max_wait_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the first retry delay in milliseconds."]
        with_backoff_base_ms,
        backoff_base_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the longest retry delay in milliseconds."]
        with_backoff_cap_ms,
        backoff_cap_ms,
        u64
    );
    option_setter!(
        #[doc = "Set how long the worker waits for new entries per drain."]
        with_drain_wait_ms,
        drain_wait_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the number of distinct label sets accepted."]
        with_max_label_sets,
        max_label_sets,
        usize
    );
    option_setter!(
        #[doc = "Set the close deadline used when the system is dropped."]
        with_shutdown_timeout_ms,
        shutdown_timeout_ms,
        u64
    );
    option_setter!(
        #[doc = "Set the interval between rate-limited warnings."]
        with_warn_interval_ms,
        warn_interval_ms,
        u64
    );

    fn required_host(&self) -> Result<String, ConfigError> {
        match self.host.as_deref().map(str::trim) {
            Some(host) if !host.is_empty() => Ok(host.to_owned()),
            _ => Err(ConfigError::InvalidConfig("host is required".into())),
        }
    }

    fn required_port(&self) -> Result<u16, ConfigError> {
        self.port
            .ok_or_else(|| ConfigError::InvalidConfig("port is required".into()))
    }

    /// Apply defaults, then validate the result and produce a [`LokiConfig`].
    pub fn build(&self) -> Result<LokiConfig, ConfigError> {
        let defaults = LokiConfig::default();
        let config = LokiConfig {
            host: self.required_host()?,
            port: self.required_port()?,
            use_tls: self.use_tls,
            path: self.path.clone().unwrap_or(defaults.path),
            headers: self.headers.clone(),
            auth: self.auth.clone().unwrap_or_default(),
            connect_timeout: timeout_or_default(self.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT),
            read_timeout: timeout_or_default(self.read_timeout_ms, DEFAULT_READ_TIMEOUT),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            buffer_size_bytes: self.buffer_size_bytes.unwrap_or(defaults.buffer_size_bytes),
            allocation: self
                .use_off_heap_buffer
                .map_or(defaults.allocation, BufferAllocation::from_off_heap),
            batch: BatchPolicy {
                max_bytes: self.batch_max_bytes.unwrap_or(defaults.batch.max_bytes),
                max_entries: self.batch_max_entries.unwrap_or(defaults.batch.max_entries),
                max_wait: millis(self.batch_max_wait_ms, defaults.batch.max_wait),
            },
            backoff: BackoffPolicy {
                base: millis(self.backoff_base_ms, defaults.backoff.base),
                cap: millis(self.backoff_cap_ms, defaults.backoff.cap),
            },
            drain_wait: millis(self.drain_wait_ms, defaults.drain_wait),
            max_label_sets: self.max_label_sets.unwrap_or(defaults.max_label_sets),
            shutdown_timeout: millis(self.shutdown_timeout_ms, defaults.shutdown_timeout),
            warn_interval: millis(self.warn_interval_ms, defaults.warn_interval),
        };
        config.validate()?;
        Ok(config)
    }
}
