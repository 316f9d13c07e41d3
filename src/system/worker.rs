//! Background thread draining the ring, batching and delivering.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use log::{debug, warn};

use crate::batcher::{Batch, Batcher};
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::error::DeliveryError;
use crate::metrics::Metrics;
use crate::rate_limited_warner::RateLimitedWarner;
use crate::ring_buffer::RingBuffer;

use super::ledger::Ledger;

pub(crate) const WORKER_THREAD_NAME: &str = "femtologging-loki";

/// Commands processed by the worker thread.
#[derive(Debug)]
pub(crate) enum Command {
    /// Seal and deliver everything buffered, then acknowledge.
    Flush(Sender<()>),
    /// Final drain and delivery bounded by `deadline`, if any, then exit.
    Shutdown { deadline: Option<Instant> },
}

/// Channels and handle the controller keeps for a running worker.
pub(crate) struct WorkerHandle {
    pub(crate) tx: Sender<Command>,
    /// Disconnects when the worker thread exits.
    pub(crate) done_rx: Receiver<()>,
    pub(crate) handle: JoinHandle<()>,
}

pub(crate) struct Worker {
    pub(crate) ring: Arc<RingBuffer>,
    pub(crate) batcher: Batcher,
    pub(crate) client: DeliveryClient,
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) warner: RateLimitedWarner,
    pub(crate) drain_wait: Duration,
    pub(crate) drain_max_bytes: usize,
    pub(crate) drain_max_entries: usize,
}

/// Start `worker` on its own named thread.
pub(crate) fn spawn(worker: Worker) -> io::Result<WorkerHandle> {
    let (tx, rx) = unbounded();
    let (done_tx, done_rx) = bounded::<()>(1);
    let handle = thread::Builder::new()
        .name(WORKER_THREAD_NAME.into())
        .spawn(move || {
            worker.run(rx);
            drop(done_tx);
        })?;
    Ok(WorkerHandle {
        tx,
        done_rx,
        handle,
    })
}

impl Worker {
    fn run(mut self, rx: Receiver<Command>) {
        loop {
            match rx.try_recv() {
                Ok(Command::Flush(ack)) => {
                    self.flush();
                    // Ignore send error: the caller may have given up waiting.
                    let _ = ack.send(());
                }
                Ok(Command::Shutdown { deadline }) => {
                    self.shutdown(deadline);
                    return;
                }
                Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => self.pump(),
            }
        }
    }

    /// Wait for entries, batch them and deliver whatever became due.
    fn pump(&mut self) {
        let now = Instant::now();
        let wait = self
            .batcher
            .next_deadline()
            .map_or(self.drain_wait, |due| {
                due.saturating_duration_since(now).min(self.drain_wait)
            });
        let entries = self
            .ring
            .drain(self.drain_max_bytes, self.drain_max_entries, wait);
        let now = Instant::now();
        for entry in entries {
            self.batcher.push(entry, now);
        }
        let due = self.batcher.take_due(now);
        self.deliver(due, None);
    }

    /// Move every buffered entry into the batcher without waiting.
    fn drain_buffered(&mut self) {
        let mut remaining = self.ring.len_entries();
        while remaining > 0 {
            let entries = self
                .ring
                .drain(self.drain_max_bytes, self.drain_max_entries, Duration::ZERO);
            if entries.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(entries.len());
            let now = Instant::now();
            for entry in entries {
                self.batcher.push(entry, now);
            }
        }
    }

    fn flush(&mut self) {
        self.drain_buffered();
        let batches = self.batcher.take_all();
        self.deliver(batches, None);
    }

    fn shutdown(&mut self, deadline: Option<Instant>) {
        self.drain_buffered();
        let batches = self.batcher.take_all();
        debug!(
            "final delivery of {} batches before shutdown deadline",
            batches.len()
        );
        self.deliver(batches, deadline);
        self.warner.flush(|count| {
            warn!("femtologging-loki lost {count} entries after delivery failures");
        });
    }

    fn deliver(&mut self, batches: Vec<Batch>, deadline: Option<Instant>) {
        if batches.is_empty() {
            return;
        }
        self.ledger.register(&batches);
        for batch in &batches {
            match self.client.send(batch, deadline) {
                DeliveryOutcome::Delivered => {
                    self.ledger.resolve(batch.id, true, &self.metrics);
                }
                // Left pending; shutdown reports the batch as unflushed.
                DeliveryOutcome::Failed(DeliveryError::Abandoned)
                | DeliveryOutcome::Failed(DeliveryError::DeadlineElapsed) => return,
                DeliveryOutcome::Failed(err) => {
                    let Some(entries) = self.ledger.resolve(batch.id, false, &self.metrics) else {
                        continue;
                    };
                    warn!(
                        "femtologging-loki failed to deliver batch {} ({} entries for {}): {err}",
                        batch.id, entries, batch.labels
                    );
                    self.warner.record_drops(entries);
                    self.warner.warn_if_due(|count| {
                        warn!("femtologging-loki lost {count} entries after delivery failures");
                    });
                }
            }
        }
    }
}
