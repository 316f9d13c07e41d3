//! Counters describing what happened to every entry handed to a
//! [`LoggingSystem`](crate::LoggingSystem).
//!
//! Every accepted entry ends up in exactly one of `delivered`, `lost` or
//! `corrupt`, or is still outstanding. Rejected entries are split by reason.
//!
//! Acceptance and frame damage are counted by the
//! [`RingBuffer`](crate::RingBuffer) under its own lock; they are merged in
//! when a snapshot is taken.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($(#[$meta:meta])* $name:ident => $incr:ident),* $(,)?) => {
        /// Live atomic counters shared by producers and the worker.
        #[derive(Debug, Default)]
        pub struct Metrics {
            $($name: AtomicU64,)*
        }

        impl Metrics {
            $(
                $(#[$meta])*
                pub fn $incr(&self, n: u64) {
                    self.$name.fetch_add(n, Ordering::Relaxed);
                }
            )*

            /// Copy every counter into a plain value, adding the ring's
            /// `accepted` count and its `corrupt_frames` to the result.
            pub fn snapshot(&self, accepted: u64, corrupt_frames: u64) -> MetricsSnapshot {
                let mut snap = MetricsSnapshot {
                    entries_accepted: accepted,
                    $($name: self.$name.load(Ordering::Relaxed),)*
                };
                snap.entries_corrupt += corrupt_frames;
                snap
            }
        }

        /// Point-in-time copy of [`Metrics`].
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct MetricsSnapshot {
            /// Entries written into the ring buffer.
            pub entries_accepted: u64,
            $($(#[$meta])* pub $name: u64,)*
        }
    };
}

counters! {
    /// Entries rejected because the ring buffer was full.
    entries_dropped_full => add_dropped_full,
    /// Entries rejected because the system was not running.
    entries_dropped_stopped => add_dropped_stopped,
    /// Entries too large to ever fit the ring buffer.
    entries_dropped_oversized => add_dropped_oversized,
    /// Entries whose label set could not be registered.
    entries_dropped_labels => add_dropped_labels,
    /// Entries discarded because their frame or label set id was damaged.
    entries_corrupt => add_corrupt,
    /// Entries acknowledged by Loki.
    entries_delivered => add_delivered,
    /// Entries in batches that reached a terminal failure.
    entries_lost => add_lost,
    /// Batches acknowledged by Loki.
    batches_delivered => add_batches_delivered,
    /// Batches that reached a terminal failure.
    batches_lost => add_batches_lost,
    /// HTTP requests issued, retries included.
    requests_sent => add_requests_sent,
    /// Requests that failed, whatever happened next.
    requests_failed => add_requests_failed,
    /// Requests issued after a transient failure.
    requests_retried => add_requests_retried,
}

impl MetricsSnapshot {
    /// Entries rejected on the producer side for any reason.
    pub fn entries_dropped(&self) -> u64 {
        self.entries_dropped_full
            + self.entries_dropped_stopped
            + self.entries_dropped_oversized
            + self.entries_dropped_labels
    }

    /// Accepted entries that have not reached a terminal state yet.
    pub fn entries_outstanding(&self) -> u64 {
        self.entries_accepted
            .saturating_sub(self.entries_delivered + self.entries_lost + self.entries_corrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let metrics = Metrics::default();
        metrics.add_delivered(6);
        metrics.add_lost(1);
        metrics.add_corrupt(1);
        metrics.add_dropped_full(3);
        metrics.add_dropped_stopped(2);
        let snap = metrics.snapshot(10, 1);
        assert_eq!(snap.entries_accepted, 10);
        assert_eq!(snap.entries_corrupt, 2);
        assert_eq!(snap.entries_dropped(), 5);
        assert_eq!(snap.entries_outstanding(), 1);
    }
}
