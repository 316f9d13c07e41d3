//! Property-based tests for the entry frame codec.

use femtologging_loki::codec::{HEADER_LEN, decode, encode};
use femtologging_loki::{LabelSetId, LogEntry};
use proptest::prelude::*;

proptest! {
    #[test]
    #[ignore]
    fn prop_frames_decode_to_the_encoded_entry(
        timestamp in any::<i64>(),
        label_set in any::<u32>(),
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        let entry = LogEntry::new(timestamp, LabelSetId::from_raw(label_set), payload);
        let frame = encode(entry.view()).expect("encode");
        prop_assert_eq!(frame.len(), HEADER_LEN + entry.payload.len());
        let (decoded, next) = decode(&frame, 0).expect("decode");
        prop_assert_eq!(next, frame.len());
        prop_assert_eq!(decoded, entry);
    }

    #[test]
    #[ignore]
    fn prop_consecutive_frames_are_independent(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..64), 1..32),
    ) {
        let entries: Vec<LogEntry> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| LogEntry::new(i as i64, LabelSetId::from_raw(i as u32), p))
            .collect();
        let bytes: Vec<u8> = entries
            .iter()
            .flat_map(|e| encode(e.view()).expect("encode"))
            .collect();

        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < bytes.len() {
            let (entry, next) = decode(&bytes, offset).expect("decode");
            decoded.push(entry);
            offset = next;
        }
        prop_assert_eq!(decoded, entries);
    }

    #[test]
    #[ignore]
    fn prop_truncated_frames_are_rejected(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        cut in 1usize..64,
    ) {
        let entry = LogEntry::new(1, LabelSetId::from_raw(1), payload);
        let frame = encode(entry.view()).expect("encode");
        let keep = frame.len().saturating_sub(cut);
        prop_assert!(decode(&frame[..keep], 0).is_err());
    }
}
