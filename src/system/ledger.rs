//! Bookkeeping of sealed batches that have not reached a terminal outcome.
//!
//! Every transition of an entry between "open in the batcher", "sealed and
//! pending" and "delivered or lost" that involves a batch happens under the
//! ledger lock, so [`Ledger::close`] sees a consistent split.

use std::collections::BTreeMap;
use std::mem;

use log::debug;
use parking_lot::Mutex;

use crate::batcher::{Batch, UnitId};
use crate::metrics::Metrics;
use crate::ring_buffer::RingBuffer;

use super::UnflushedUnit;

#[derive(Default)]
struct LedgerInner {
    pending: BTreeMap<UnitId, u64>,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    /// Record freshly sealed batches as pending.
    pub(crate) fn register(&self, batches: &[Batch]) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        for batch in batches {
            inner.pending.insert(batch.id, batch.len() as u64);
        }
    }

    /// Move a pending batch to delivered or lost and update `metrics`.
    ///
    /// Returns the batch's entry count, or `None` when the batch was already
    /// reported as unflushed by [`close`](Self::close).
    pub(crate) fn resolve(&self, id: UnitId, delivered: bool, metrics: &Metrics) -> Option<u64> {
        let mut inner = self.inner.lock();
        let Some(entries) = inner.pending.remove(&id) else {
            debug!("batch {id} resolved after shutdown; outcome ignored");
            return None;
        };
        if delivered {
            metrics.add_delivered(entries);
            metrics.add_batches_delivered(1);
        } else {
            metrics.add_lost(entries);
            metrics.add_batches_lost(1);
        }
        Some(entries)
    }

    /// Entries in pending batches.
    #[cfg(test)]
    pub(crate) fn pending_entries(&self) -> u64 {
        self.inner.lock().pending.values().sum()
    }

    /// Stop tracking and return every outstanding unit.
    ///
    /// Pending batches are returned by id; entries that were accepted but
    /// are neither pending nor resolved form the [`UnitId::REMAINDER`] unit,
    /// listed first.
    pub(crate) fn close(&self, ring: Option<&RingBuffer>, metrics: &Metrics) -> Vec<UnflushedUnit> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let pending = mem::take(&mut inner.pending);
        let (accepted, corrupt_frames) = ring.map_or((0, 0), |r| (r.accepted(), r.corrupt()));
        let outstanding = metrics
            .snapshot(accepted, corrupt_frames)
            .entries_outstanding();
        drop(inner);

        let in_batches: u64 = pending.values().sum();
        let remainder = outstanding.saturating_sub(in_batches);
        let mut units = Vec::with_capacity(pending.len() + 1);
        if remainder > 0 {
            units.push(UnflushedUnit {
                id: UnitId::REMAINDER,
                entries: remainder,
            });
        }
        units.extend(
            pending
                .into_iter()
                .map(|(id, entries)| UnflushedUnit { id, entries }),
        );
        units
    }
}
