//! Grouping of drained entries into per-stream batches.
//!
//! The batcher lives on the worker thread only. Each label set has at most
//! one open group; a group is sealed into a [`Batch`] once it reaches the
//! byte or entry threshold, or once its oldest entry has waited
//! `max_wait`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use log::error;

use crate::codec::LogEntry;
use crate::config::BatchPolicy;
use crate::labels::{LabelRegistry, LabelSet, LabelSetId};
use crate::metrics::Metrics;

/// Nanosecond timestamp string plus JSON punctuation around each value.
const ENTRY_WIRE_OVERHEAD: usize = 32;

/// Opaque identifier of a unit of outstanding work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    /// Entries accepted but not yet sealed into any batch.
    pub const REMAINDER: UnitId = UnitId(0);

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_remainder(self) -> bool {
        self == Self::REMAINDER
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entries for a single label set, in the order they were drained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    pub id: UnitId,
    pub labels: Arc<LabelSet>,
    pub entries: Vec<(i64, Vec<u8>)>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct OpenGroup {
    labels: Arc<LabelSet>,
    entries: Vec<(i64, Vec<u8>)>,
    bytes: usize,
    opened_at: Instant,
    opened_seq: u64,
}

/// Accumulates entries into batches according to a [`BatchPolicy`].
pub struct Batcher {
    policy: BatchPolicy,
    registry: Arc<LabelRegistry>,
    metrics: Arc<Metrics>,
    open: HashMap<LabelSetId, OpenGroup>,
    sealed: VecDeque<Batch>,
    next_id: u64,
    next_seq: u64,
    open_entries: usize,
}

impl Batcher {
    pub fn new(policy: BatchPolicy, registry: Arc<LabelRegistry>, metrics: Arc<Metrics>) -> Self {
        Self {
            policy,
            registry,
            metrics,
            open: HashMap::new(),
            sealed: VecDeque::new(),
            next_id: 1,
            next_seq: 0,
            open_entries: 0,
        }
    }

    /// Add one drained entry to its label set's open group.
    ///
    /// An entry that would push the group past `max_bytes` seals the group
    /// first, so a batch only exceeds the limit when it holds a single entry.
    /// Entries with an unknown label set id are counted as corrupt.
    pub fn push(&mut self, entry: LogEntry, now: Instant) {
        let LogEntry {
            timestamp_millis,
            label_set,
            payload,
        } = entry;
        let size = payload.len() + ENTRY_WIRE_OVERHEAD;
        let would_overflow = self
            .open
            .get(&label_set)
            .is_some_and(|group| group.bytes + size > self.policy.max_bytes);
        if would_overflow {
            self.seal(label_set);
        }

        if !self.open.contains_key(&label_set) {
            let Some(labels) = self.registry.resolve(label_set) else {
                self.metrics.add_corrupt(1);
                error!("dropping entry with unknown label set id {}", label_set.get());
                return;
            };
            self.open.insert(
                label_set,
                OpenGroup {
                    labels,
                    entries: Vec::new(),
                    bytes: 0,
                    opened_at: now,
                    opened_seq: self.next_seq,
                },
            );
            self.next_seq += 1;
        }
        let Some(group) = self.open.get_mut(&label_set) else {
            return;
        };
        group.entries.push((timestamp_millis, payload));
        group.bytes += size;
        self.open_entries += 1;
        if group.bytes >= self.policy.max_bytes || group.entries.len() >= self.policy.max_entries {
            self.seal(label_set);
        }
    }

    fn seal(&mut self, label_set: LabelSetId) {
        let Some(group) = self.open.remove(&label_set) else {
            return;
        };
        self.open_entries -= group.entries.len();
        let id = UnitId(self.next_id);
        self.next_id += 1;
        self.sealed.push_back(Batch {
            id,
            labels: group.labels,
            entries: group.entries,
        });
    }

    fn seal_where(&mut self, mut due: impl FnMut(&OpenGroup) -> bool) {
        let mut ids: Vec<(u64, LabelSetId)> = self
            .open
            .iter()
            .filter(|(_, group)| due(group))
            .map(|(id, group)| (group.opened_seq, *id))
            .collect();
        ids.sort_unstable();
        for (_, id) in ids {
            self.seal(id);
        }
    }

    /// Seal groups whose oldest entry has waited `max_wait` and return every
    /// sealed batch in seal order.
    pub fn take_due(&mut self, now: Instant) -> Vec<Batch> {
        let max_wait = self.policy.max_wait;
        self.seal_where(|group| now.saturating_duration_since(group.opened_at) >= max_wait);
        self.sealed.drain(..).collect()
    }

    /// Seal every open group and return all batches.
    pub fn take_all(&mut self) -> Vec<Batch> {
        self.seal_where(|_| true);
        self.sealed.drain(..).collect()
    }

    /// Earliest instant at which an open group becomes due by age.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.open
            .values()
            .map(|group| group.opened_at + self.policy.max_wait)
            .min()
    }

    /// Entries held in open groups.
    pub fn open_entries(&self) -> usize {
        self.open_entries
    }

    /// Whether nothing is waiting, open or sealed.
    pub fn is_idle(&self) -> bool {
        self.open.is_empty() && self.sealed.is_empty()
    }
}

impl fmt::Debug for Batcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("open_groups", &self.open.len())
            .field("open_entries", &self.open_entries)
            .field("sealed", &self.sealed.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
