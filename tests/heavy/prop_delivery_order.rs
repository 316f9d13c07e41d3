//! Property-based tests for end-to-end delivery through `LoggingSystem`.
//!
//! Arbitrary lines spread over several streams must arrive intact and, within
//! each stream, in the order a single producer logged them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use femtologging_loki::test_util::RecordingTransport;
use femtologging_loki::{LabelSet, LoggingSystem, LokiConfigBuilder};
use proptest::prelude::*;

fn system(transport: Arc<RecordingTransport>, batch_entries: usize) -> LoggingSystem {
    let config = LokiConfigBuilder::new()
        .with_host("127.0.0.1")
        .with_port(3100)
        .with_buffer_size_bytes(1 << 20)
        .with_off_heap_buffer(false)
        .with_batch_max_entries(batch_entries)
        .with_batch_max_wait_ms(5)
        .with_drain_wait_ms(5)
        .build()
        .expect("config");
    let system = LoggingSystem::with_transport(config, transport).expect("system");
    system.start().expect("start");
    system
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    #[ignore]
    fn prop_streams_keep_their_order(
        entries in proptest::collection::vec((0usize..4, "\\PC{0,40}"), 1..300),
        batch_entries in 1usize..64,
    ) {
        let transport = Arc::new(RecordingTransport::new());
        let system = system(Arc::clone(&transport), batch_entries);
        let streams: Vec<LabelSet> = (0..4)
            .map(|i| LabelSet::from_pairs([("stream", format!("s{i}"))]).expect("labels"))
            .collect();

        let logger = system.create_logger();
        let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (ts, (stream, line)) in entries.iter().enumerate() {
            logger.log(ts as i64, &streams[*stream], line.as_bytes());
            expected.entry(format!("s{stream}")).or_default().push(line.clone());
        }
        let mut unflushed = 0;
        system.close(Duration::from_secs(10), |unit| unflushed += unit.entries);
        prop_assert_eq!(unflushed, 0);

        let mut actual: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for line in transport.lines() {
            actual.entry(line.labels["stream"].clone()).or_default().push(line.line);
        }
        prop_assert_eq!(actual, expected);
        prop_assert_eq!(system.metrics().entries_delivered, entries.len() as u64);
    }
}
