//! In-process [`PushTransport`] fakes for tests.
//!
//! Enabled by the `test-util` feature so integration tests and downstream
//! crates can drive a [`LoggingSystem`](crate::LoggingSystem) without a
//! network.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;

use crate::delivery::PushTransport;
use crate::error::TransportError;

/// One line pushed to Loki, decoded from a request body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushedLine {
    pub labels: BTreeMap<String, String>,
    pub timestamp_nanos: String,
    pub line: String,
}

/// Decode every line in a push request body.
pub fn decode_push_body(body: &[u8]) -> Vec<PushedLine> {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return Vec::new();
    };
    let mut lines = Vec::new();
    for stream in json["streams"].as_array().into_iter().flatten() {
        let labels: BTreeMap<String, String> = stream["stream"]
            .as_object()
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_owned()))
            .collect();
        for value in stream["values"].as_array().into_iter().flatten() {
            lines.push(PushedLine {
                labels: labels.clone(),
                timestamp_nanos: value[0].as_str().unwrap_or_default().to_owned(),
                line: value[1].as_str().unwrap_or_default().to_owned(),
            });
        }
    }
    lines
}

/// Records every body and answers with a fixed status.
pub struct RecordingTransport {
    status: u16,
    bodies: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_status(204)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            bodies: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> usize {
        self.bodies.lock().len()
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().clone()
    }

    /// Every pushed line across all requests, in push order.
    pub fn lines(&self) -> Vec<PushedLine> {
        self.bodies
            .lock()
            .iter()
            .flat_map(|body| decode_push_body(body))
            .collect()
    }
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTransport for RecordingTransport {
    fn push(&self, body: &[u8], _timeout: Option<Duration>) -> Result<u16, TransportError> {
        self.bodies.lock().push(body.to_vec());
        Ok(self.status)
    }
}

/// Replays scripted replies, then repeats a fallback.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<u16, TransportError>>>,
    fallback: Result<u16, TransportError>,
    attempts: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(
        replies: impl IntoIterator<Item = Result<u16, TransportError>>,
        fallback: Result<u16, TransportError>,
    ) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Always answer with `status`.
    pub fn always(status: u16) -> Self {
        Self::new([], Ok(status))
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PushTransport for ScriptedTransport {
    fn push(&self, _body: &[u8], _timeout: Option<Duration>) -> Result<u16, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Never answers until [`release`](Self::release) is called, ignoring the
/// per-request timeout like a server that accepted the connection and went
/// silent.
pub struct HangingTransport {
    released: Mutex<bool>,
    wake: Condvar,
    max_hang: Duration,
    attempts: AtomicUsize,
}

impl HangingTransport {
    /// Hang for at most `max_hang` so stray threads do not outlive the test.
    pub fn new(max_hang: Duration) -> Self {
        Self {
            released: Mutex::new(false),
            wake: Condvar::new(),
            max_hang,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn release(&self) {
        *self.released.lock() = true;
        self.wake.notify_all();
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PushTransport for HangingTransport {
    fn push(&self, _body: &[u8], _timeout: Option<Duration>) -> Result<u16, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let until = Instant::now() + self.max_hang;
        let mut released = self.released.lock();
        while !*released {
            if self.wake.wait_until(&mut released, until).timed_out() {
                return Err(TransportError("timed out".into()));
            }
        }
        Ok(204)
    }
}
