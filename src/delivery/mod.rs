//! Delivery of sealed batches to Loki with bounded retries.
//!
//! [`DeliveryClient::send`] runs on the worker thread. Failures never reach
//! producers; they end as a [`DeliveryOutcome::Failed`] that the caller
//! records in the metrics.

pub mod backoff;
pub mod push;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::batcher::Batch;
use crate::config::BackoffPolicy;
use crate::error::DeliveryError;
use crate::metrics::Metrics;

use self::backoff::RetryBackoff;
pub use self::transport::{PushTransport, UreqTransport};

/// Slice used while sleeping between attempts so abandonment is noticed.
const ABANDON_POLL: Duration = Duration::from_millis(20);

/// Classification of an HTTP status for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx responses.
    Success,
    /// 429 and 5xx responses.
    Retryable,
    /// Everything else.
    Permanent,
}

/// Classify an HTTP status code for retry logic.
pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        429 | 500..=599 => ResponseClass::Retryable,
        _ => ResponseClass::Permanent,
    }
}

/// Final result of delivering one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(DeliveryError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Sends batches through a [`PushTransport`], retrying transient failures.
pub struct DeliveryClient {
    transport: Arc<dyn PushTransport>,
    max_retries: u32,
    backoff: BackoffPolicy,
    metrics: Arc<Metrics>,
    abandoned: Arc<AtomicBool>,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        max_retries: u32,
        backoff: BackoffPolicy,
        metrics: Arc<Metrics>,
        abandoned: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            max_retries,
            backoff,
            metrics,
            abandoned,
        }
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Deliver `batch`, making at most `max_retries + 1` attempts.
    ///
    /// With a `deadline`, every request timeout is clamped to the time left
    /// and no attempt starts after it.
    pub fn send(&self, batch: &Batch, deadline: Option<Instant>) -> DeliveryOutcome {
        let body = match push::encode_batch(batch) {
            Ok(body) => body,
            Err(err) => return DeliveryOutcome::Failed(err),
        };
        let mut backoff = RetryBackoff::new(self.backoff.clone());
        let mut attempt: u32 = 0;
        loop {
            if self.is_abandoned() {
                return DeliveryOutcome::Failed(DeliveryError::Abandoned);
            }
            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return DeliveryOutcome::Failed(DeliveryError::DeadlineElapsed);
                    }
                    Some(remaining)
                }
                None => None,
            };

            self.metrics.add_requests_sent(1);
            if attempt > 0 {
                self.metrics.add_requests_retried(1);
            }
            let err = match self.transport.push(&body, timeout) {
                Ok(status) => match classify_status(status) {
                    ResponseClass::Success => return DeliveryOutcome::Delivered,
                    ResponseClass::Retryable => DeliveryError::RetryableStatus(status),
                    ResponseClass::Permanent => DeliveryError::Rejected(status),
                },
                Err(err) => DeliveryError::Transport(err),
            };
            self.metrics.add_requests_failed(1);

            if !err.is_transient() || attempt >= self.max_retries {
                return DeliveryOutcome::Failed(err);
            }
            let delay = backoff.next_delay();
            if let Some(deadline) = deadline
                && Instant::now()
                    .checked_add(delay)
                    .is_none_or(|resume| resume >= deadline)
            {
                return DeliveryOutcome::Failed(DeliveryError::DeadlineElapsed);
            }
            debug!(
                "batch {} attempt {} failed ({err}); retrying in {delay:?}",
                batch.id,
                attempt + 1
            );
            if !self.sleep_unless_abandoned(delay) {
                return DeliveryOutcome::Failed(DeliveryError::Abandoned);
            }
            attempt += 1;
        }
    }

    /// Sleep for `delay`, returning `false` early once the abandon flag is set.
    fn sleep_unless_abandoned(&self, delay: Duration) -> bool {
        let started = Instant::now();
        loop {
            if self.is_abandoned() {
                return false;
            }
            let left = delay.saturating_sub(started.elapsed());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(ABANDON_POLL));
        }
    }
}
