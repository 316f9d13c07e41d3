//! Error types shared across the crate.
//!
//! Producer-side failures ([`LogError`]) are only ever returned by
//! [`Logger::try_log`](crate::Logger::try_log); [`Logger::log`](crate::Logger::log)
//! records them in the metrics and carries on. Delivery failures stay on the
//! worker thread.

use std::io;

use thiserror::Error;

/// Errors that may occur while building a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid user supplied configuration.
    #[error("invalid loki configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst reading a configuration file.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The INI document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Ini(String),
}

/// Lifecycle misuse, such as starting a system twice.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("logging system already started")]
    AlreadyStarted,
    #[error("logging system is closed")]
    Closed,
    #[error("failed to spawn the delivery worker thread")]
    WorkerSpawn,
}

/// Reasons an entry was not accepted by the ring buffer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LogError {
    /// Not enough free space; the entry was dropped.
    #[error("ring buffer full")]
    BufferFull,
    /// The encoded entry can never fit the configured buffer.
    #[error("entry of {size} bytes exceeds the frame limit of {limit} bytes")]
    Oversized { size: usize, limit: usize },
    /// The system is not running.
    #[error("logging system is not running")]
    Stopped,
    /// The label registry is full and the label set is new.
    #[error("label set limit of {0} reached")]
    LabelLimit(usize),
}

/// Label validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("invalid label name {0:?}")]
    InvalidName(String),
}

/// Frame decoding and encoding failures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the frame header or length announces.
    #[error("frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    /// The frame length prefix is impossible.
    #[error("invalid frame length {0}")]
    InvalidLength(u32),
    /// Frame and payload lengths disagree. The frame can still be skipped.
    #[error("frame length {frame} does not match payload length {payload}")]
    LengthMismatch { frame: u32, payload: u32 },
    /// Payload exceeds what the frame format can describe.
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
}

/// Failure of the HTTP transport below the status-code level.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Terminal reasons a batch was not delivered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connect, read, or write failure (transient).
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// The server answered 429 or 5xx (transient).
    #[error("server returned retryable status {0}")]
    RetryableStatus(u16),
    /// The server rejected the batch (permanent).
    #[error("server rejected batch with status {0}")]
    Rejected(u16),
    /// The batch could not be serialised (permanent).
    #[error("failed to encode push request: {0}")]
    Encoding(String),
    /// The shutdown deadline left no time for another attempt.
    #[error("delivery deadline elapsed")]
    DeadlineElapsed,
    /// The system gave up on the batch during shutdown.
    #[error("delivery abandoned at shutdown")]
    Abandoned,
}

impl DeliveryError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RetryableStatus(_))
    }
}
