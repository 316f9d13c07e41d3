//! INI loading for [`LokiConfigBuilder`].
//!
//! A section holds the appender options using their historical key names;
//! custom headers live in a companion `<section>.headers` section:
//!
//! ```ini
//! [loki]
//! host = loki.internal
//! port = 3100
//! max_retries = 3
//! buffer_size_megabytes = 8
//!
//! [loki.headers]
//! X-Scope-OrgID = tenant-1
//! ```

use std::fs;
use std::path::Path;
use std::str::FromStr;

use ini::{Ini, Properties};

use crate::error::ConfigError;

use super::LokiConfigBuilder;

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| {
        ConfigError::InvalidConfig(format!("invalid value for {key}: {value:?} ({err})"))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidConfig(format!(
            "invalid value for {key}: {value:?} (expected a boolean)"
        ))),
    }
}

#[derive(Default)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
    bearer_token: Option<String>,
}

impl Credentials {
    fn apply(self, builder: LokiConfigBuilder) -> Result<LokiConfigBuilder, ConfigError> {
        match (self.username, self.password, self.bearer_token) {
            (None, None, None) => Ok(builder),
            (Some(user), Some(pass), None) => Ok(builder.with_basic_auth(user, pass)),
            (None, None, Some(token)) => Ok(builder.with_bearer_token(token)),
            (_, _, Some(_)) => Err(ConfigError::InvalidConfig(
                "bearer_token cannot be combined with username/password".into(),
            )),
            _ => Err(ConfigError::InvalidConfig(
                "username and password must be provided together".into(),
            )),
        }
    }
}

fn apply_key(
    builder: LokiConfigBuilder,
    credentials: &mut Credentials,
    key: &str,
    value: &str,
) -> Result<LokiConfigBuilder, ConfigError> {
    let builder = match key {
        "host" => builder.with_host(value.trim()),
        "port" => builder.with_port(parse_value(key, value)?),
        "use_tls" => builder.with_tls(parse_bool(key, value)?),
        "path" => builder.with_path(value.trim()),
        "connect_timeout_millis" => builder.with_connect_timeout_ms(parse_value(key, value)?),
        "read_timeout_millis" => builder.with_read_timeout_ms(parse_value(key, value)?),
        "max_retries" => builder.with_max_retries(parse_value(key, value)?),
        "buffer_size_megabytes" => builder.with_buffer_size_megabytes(parse_value(key, value)?),
        "buffer_size_bytes" => builder.with_buffer_size_bytes(parse_value(key, value)?),
        "use_off_heap_buffer" => builder.with_off_heap_buffer(parse_bool(key, value)?),
        "batch_max_bytes" => builder.with_batch_max_bytes(parse_value(key, value)?),
        "batch_max_entries" => builder.with_batch_max_entries(parse_value(key, value)?),
        "batch_max_wait_millis" => builder.with_batch_max_wait_ms(parse_value(key, value)?),
        "backoff_base_millis" => builder.with_backoff_base_ms(parse_value(key, value)?),
        "backoff_cap_millis" => builder.with_backoff_cap_ms(parse_value(key, value)?),
        "drain_wait_millis" => builder.with_drain_wait_ms(parse_value(key, value)?),
        "max_label_sets" => builder.with_max_label_sets(parse_value(key, value)?),
        "shutdown_timeout_millis" => builder.with_shutdown_timeout_ms(parse_value(key, value)?),
        "warn_interval_millis" => builder.with_warn_interval_ms(parse_value(key, value)?),
        "username" => {
            credentials.username = Some(value.to_owned());
            builder
        }
        "password" => {
            credentials.password = Some(value.to_owned());
            builder
        }
        "bearer_token" => {
            credentials.bearer_token = Some(value.to_owned());
            builder
        }
        other => {
            return Err(ConfigError::InvalidConfig(format!(
                "unknown configuration key {other:?}"
            )));
        }
    };
    Ok(builder)
}

fn apply_section(props: &Properties) -> Result<LokiConfigBuilder, ConfigError> {
    let mut credentials = Credentials::default();
    let mut builder = LokiConfigBuilder::new();
    for (key, value) in props.iter() {
        builder = apply_key(builder, &mut credentials, key.trim(), value)?;
    }
    credentials.apply(builder)
}

impl LokiConfigBuilder {
    /// Populate a builder from an INI document.
    ///
    /// Unknown keys are rejected so typos surface early. The returned builder
    /// still needs [`build`](Self::build) to validate the combined values.
    pub fn from_ini_str(text: &str, section: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|err| ConfigError::Ini(err.to_string()))?;
        let props = ini.section(Some(section)).ok_or_else(|| {
            ConfigError::InvalidConfig(format!("missing configuration section [{section}]"))
        })?;
        let mut builder = apply_section(props)?;
        if let Some(headers) = ini.section(Some(format!("{section}.headers"))) {
            for (key, value) in headers.iter() {
                builder = builder.with_header(key.trim(), value.trim());
            }
        }
        Ok(builder)
    }

    /// Read `path` and delegate to [`from_ini_str`](Self::from_ini_str).
    pub fn from_ini_file(path: impl AsRef<Path>, section: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_ini_str(&text, section)
    }
}
