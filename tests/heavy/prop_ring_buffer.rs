//! Property-based tests for `RingBuffer`.
//!
//! Random interleavings of offers and drains against random capacities must
//! hand back exactly the accepted entries, in the order they were offered.

use std::time::Duration;

use femtologging_loki::codec::{EntryRef, HEADER_LEN};
use femtologging_loki::{BufferAllocation, LabelSetId, LogError, RingBuffer};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Offer(Vec<u8>),
    Drain(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => proptest::collection::vec(any::<u8>(), 0..96).prop_map(Op::Offer),
        1 => (1usize..8).prop_map(Op::Drain),
    ]
}

proptest! {
    #[test]
    #[ignore]
    fn prop_ring_preserves_accepted_entries_in_order(
        capacity in (HEADER_LEN * 4)..2048usize,
        ops in proptest::collection::vec(op(), 1..200),
    ) {
        let ring = RingBuffer::new(capacity, BufferAllocation::Heap);
        let mut accepted: Vec<(i64, Vec<u8>)> = Vec::new();
        let mut drained: Vec<(i64, Vec<u8>)> = Vec::new();
        let mut rejected = 0u64;

        for (seq, op) in ops.into_iter().enumerate() {
            match op {
                Op::Offer(payload) => {
                    let entry = EntryRef {
                        timestamp_millis: seq as i64,
                        label_set: LabelSetId::from_raw(7),
                        payload: &payload,
                    };
                    match ring.offer(entry) {
                        Ok(()) => accepted.push((seq as i64, payload)),
                        Err(LogError::BufferFull | LogError::Oversized { .. }) => rejected += 1,
                        Err(other) => prop_assert!(false, "unexpected rejection {other}"),
                    }
                }
                Op::Drain(max_entries) => {
                    for entry in ring.drain(usize::MAX, max_entries, Duration::ZERO) {
                        prop_assert_eq!(entry.label_set, LabelSetId::from_raw(7));
                        drained.push((entry.timestamp_millis, entry.payload));
                    }
                }
            }
            prop_assert!(ring.len_bytes() <= ring.capacity());
        }
        while !ring.is_empty() {
            for entry in ring.drain(usize::MAX, usize::MAX, Duration::ZERO) {
                drained.push((entry.timestamp_millis, entry.payload));
            }
        }

        prop_assert_eq!(ring.accepted(), accepted.len() as u64);
        prop_assert_eq!(ring.dropped(), rejected);
        prop_assert_eq!(ring.corrupt(), 0);
        prop_assert_eq!(drained, accepted);
    }
}
