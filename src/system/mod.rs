//! Lifecycle controller tying the ring buffer, worker and delivery together.
//!
//! A [`LoggingSystem`] moves through `Created → Started → Stopping →
//! Stopped`. Producers obtain cheap [`Logger`] handles; every call on the
//! hot path reads the lifecycle state from an atomic and takes only the ring
//! buffer's short critical section.

mod ledger;
mod worker;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded};
use log::{debug, error, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::batcher::{Batcher, UnitId};
use crate::codec::EntryRef;
use crate::config::LokiConfig;
use crate::delivery::{DeliveryClient, PushTransport, UreqTransport};
use crate::error::{ConfigError, LogError, StateError};
use crate::labels::{LabelRegistry, LabelSet};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::rate_limited_warner::RateLimitedWarner;
use crate::ring_buffer::RingBuffer;

use self::ledger::Ledger;
use self::worker::{Command, Worker, WorkerHandle};

/// Lifecycle state of a [`LoggingSystem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Started = 1,
    Stopping = 2,
    Stopped = 3,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Work still outstanding when [`LoggingSystem::close`] gave up on it.
///
/// `id` is [`UnitId::REMAINDER`] for entries that were accepted but never
/// sealed into a batch; otherwise it names one undelivered batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnflushedUnit {
    pub id: UnitId,
    pub entries: u64,
}

struct Shared {
    state: AtomicU8,
    ring: OnceCell<Arc<RingBuffer>>,
    registry: Arc<LabelRegistry>,
    metrics: Arc<Metrics>,
    warner: RateLimitedWarner,
}

impl Shared {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn offer(
        &self,
        timestamp_millis: i64,
        labels: &LabelSet,
        payload: &[u8],
    ) -> Result<(), LogError> {
        if self.state() != State::Started {
            return Err(LogError::Stopped);
        }
        let Some(ring) = self.ring.get() else {
            return Err(LogError::Stopped);
        };
        let label_set = self.registry.intern(labels)?;
        ring.offer(EntryRef {
            timestamp_millis,
            label_set,
            payload,
        })
    }

    fn record_rejection(&self, err: &LogError) {
        match err {
            LogError::BufferFull => self.metrics.add_dropped_full(1),
            LogError::Stopped => self.metrics.add_dropped_stopped(1),
            LogError::Oversized { .. } => self.metrics.add_dropped_oversized(1),
            LogError::LabelLimit(_) => self.metrics.add_dropped_labels(1),
        }
        self.warner.record_drop();
        self.warner.warn_if_due(|count| {
            warn!("femtologging-loki dropped {count} entries; latest reason: {err}");
        });
    }

    fn snapshot(&self) -> MetricsSnapshot {
        let (accepted, corrupt_frames) = self
            .ring
            .get()
            .map_or((0, 0), |ring| (ring.accepted(), ring.corrupt()));
        self.metrics.snapshot(accepted, corrupt_frames)
    }
}

/// Cheap, cloneable producer handle.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
}

impl Logger {
    /// Enqueue one entry, silently dropping it if it cannot be accepted.
    ///
    /// Drops are counted in [`LoggingSystem::metrics`] and reported through
    /// rate-limited warnings.
    pub fn log(&self, timestamp_millis: i64, labels: &LabelSet, payload: &[u8]) {
        let _ = self.try_log(timestamp_millis, labels, payload);
    }

    /// Enqueue one entry, reporting why it was dropped.
    pub fn try_log(
        &self,
        timestamp_millis: i64,
        labels: &LabelSet,
        payload: &[u8],
    ) -> Result<(), LogError> {
        let result = self.shared.offer(timestamp_millis, labels, payload);
        if let Err(err) = &result {
            self.shared.record_rejection(err);
        }
        result
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("state", &self.shared.state())
            .finish()
    }
}

struct Running {
    worker: WorkerHandle,
    ring: Arc<RingBuffer>,
    ledger: Arc<Ledger>,
    abandoned: Arc<AtomicBool>,
}

/// Buffered Loki shipping pipeline owned by the host application.
pub struct LoggingSystem {
    config: LokiConfig,
    shared: Arc<Shared>,
    transport: Arc<dyn PushTransport>,
    running: Mutex<Option<Running>>,
}

impl LoggingSystem {
    /// Validate `config` and prepare an HTTP transport for it.
    pub fn new(config: LokiConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = UreqTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Like [`new`](Self::new) but pushing through `transport`.
    pub fn with_transport(
        config: LokiConfig,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: AtomicU8::new(State::Created as u8),
            ring: OnceCell::new(),
            registry: Arc::new(LabelRegistry::new(config.max_label_sets)),
            metrics: Arc::new(Metrics::default()),
            warner: RateLimitedWarner::new(config.warn_interval),
        });
        Ok(Self {
            config,
            shared,
            transport,
            running: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &LokiConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Return a producer handle. Entries logged before [`start`](Self::start)
    /// or after [`close`](Self::close) are dropped.
    pub fn create_logger(&self) -> Logger {
        Logger {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Allocate the ring buffer and spawn the delivery worker.
    pub fn start(&self) -> Result<(), StateError> {
        let mut running = self.running.lock();
        match self.state() {
            State::Created => {}
            State::Started => return Err(StateError::AlreadyStarted),
            State::Stopping | State::Stopped => return Err(StateError::Closed),
        }
        let ring = Arc::new(RingBuffer::new(
            self.config.buffer_size_bytes,
            self.config.allocation,
        ));
        if self.shared.ring.set(Arc::clone(&ring)).is_err() {
            return Err(StateError::AlreadyStarted);
        }

        let abandoned = Arc::new(AtomicBool::new(false));
        let ledger = Arc::new(Ledger::default());
        let metrics = Arc::clone(&self.shared.metrics);
        let batch = self.config.batch.clone();
        let worker = Worker {
            ring: Arc::clone(&ring),
            batcher: Batcher::new(
                batch.clone(),
                Arc::clone(&self.shared.registry),
                Arc::clone(&metrics),
            ),
            client: DeliveryClient::new(
                Arc::clone(&self.transport),
                self.config.max_retries,
                self.config.backoff.clone(),
                Arc::clone(&metrics),
                Arc::clone(&abandoned),
            ),
            ledger: Arc::clone(&ledger),
            metrics,
            warner: RateLimitedWarner::new(self.config.warn_interval),
            drain_wait: self.config.drain_wait,
            drain_max_bytes: batch.max_bytes,
            drain_max_entries: batch.max_entries,
        };
        let handle = worker::spawn(worker).map_err(|err| {
            error!("femtologging-loki could not spawn its worker thread: {err}");
            StateError::WorkerSpawn
        })?;
        *running = Some(Running {
            worker: handle,
            ring,
            ledger,
            abandoned,
        });
        self.shared.set_state(State::Started);
        debug!(
            "femtologging-loki started with a {} byte buffer",
            self.config.buffer_size_bytes
        );
        Ok(())
    }

    /// Ask the worker to deliver everything buffered so far.
    ///
    /// Returns `true` if the worker finished within `timeout`. A `false`
    /// result does not cancel the flush. A timeout too large to express as
    /// an instant waits without limit.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let (tx, ring) = {
            let running = self.running.lock();
            match running.as_ref() {
                Some(r) if self.state() == State::Started => {
                    (r.worker.tx.clone(), Arc::clone(&r.ring))
                }
                _ => return false,
            }
        };
        self.shared.warner.flush(|count| {
            warn!("femtologging-loki dropped {count} entries in the last interval");
        });
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(Command::Flush(ack_tx)).is_err() {
            return false;
        }
        ring.wake();
        match deadline {
            Some(deadline) => ack_rx.recv_deadline(deadline).is_ok(),
            None => ack_rx.recv().is_ok(),
        }
    }

    /// Stop accepting entries and deliver what is buffered until `timeout`.
    ///
    /// `on_unflushed` is called once per unit of work that was not delivered
    /// or definitively lost in time. The worker is joined only if it
    /// finished; otherwise it is left to exit after its in-flight request.
    /// Later calls return immediately. A timeout too large to express as an
    /// instant waits for the worker without limit.
    pub fn close(&self, timeout: Duration, mut on_unflushed: impl FnMut(UnflushedUnit)) {
        let deadline = Instant::now().checked_add(timeout);
        let mut running = self.running.lock();
        match self.state() {
            State::Started => {}
            State::Created => {
                self.shared.set_state(State::Stopped);
                return;
            }
            State::Stopping | State::Stopped => return,
        }
        self.shared.set_state(State::Stopping);
        let Some(Running {
            worker,
            ring,
            ledger,
            abandoned,
        }) = running.take()
        else {
            self.shared.set_state(State::Stopped);
            return;
        };

        ring.seal();
        let finished = if worker.tx.send(Command::Shutdown { deadline }).is_ok() {
            ring.wake();
            match deadline {
                Some(deadline) => !matches!(
                    worker.done_rx.recv_deadline(deadline),
                    Err(RecvTimeoutError::Timeout)
                ),
                // Disconnects once the worker exits.
                None => worker.done_rx.recv().is_err(),
            }
        } else {
            true
        };
        abandoned.store(true, Ordering::Release);
        ring.wake();

        for unit in ledger.close(Some(&ring), &self.shared.metrics) {
            on_unflushed(unit);
        }

        if finished {
            if worker.handle.join().is_err() {
                warn!("femtologging-loki worker thread panicked");
            }
        } else {
            warn!("femtologging-loki worker did not finish within {timeout:?}; detaching it");
        }
        self.shared.warner.flush(|count| {
            warn!("femtologging-loki dropped {count} entries in the last interval");
        });
        self.shared.set_state(State::Stopped);
    }

    /// Point-in-time counters for this system.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.snapshot()
    }
}

impl Drop for LoggingSystem {
    fn drop(&mut self) {
        self.close(self.config.shutdown_timeout, |unit| {
            warn!(
                "femtologging-loki dropped {} undelivered entries (unit {}) at shutdown",
                unit.entries, unit.id
            );
        });
    }
}

impl fmt::Debug for LoggingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingSystem")
            .field("url", &self.config.push_url())
            .field("state", &self.state())
            .finish()
    }
}
