//! JSON body for Loki's push endpoint.
//!
//! Batches are serialised straight from their borrowed entries; no
//! intermediate `serde_json::Value` tree is built.

use serde::Serialize;
use serde::ser::{SerializeMap, SerializeSeq, SerializeTuple, Serializer};

use crate::batcher::Batch;
use crate::error::DeliveryError;

const NANOS_PER_MILLI: i128 = 1_000_000;

struct PushRequest<'a>(&'a [&'a Batch]);

struct Streams<'a>(&'a [&'a Batch]);

struct Stream<'a>(&'a Batch);

struct Values<'a>(&'a [(i64, Vec<u8>)]);

struct Value<'a> {
    timestamp_millis: i64,
    line: &'a [u8],
}

impl Serialize for PushRequest<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("streams", &Streams(self.0))?;
        map.end()
    }
}

impl Serialize for Streams<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for batch in self.0 {
            seq.serialize_element(&Stream(batch))?;
        }
        seq.end()
    }
}

impl Serialize for Stream<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("stream", self.0.labels.as_ref())?;
        map.serialize_entry("values", &Values(&self.0.entries))?;
        map.end()
    }
}

impl Serialize for Values<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for (timestamp_millis, line) in self.0 {
            seq.serialize_element(&Value {
                timestamp_millis: *timestamp_millis,
                line,
            })?;
        }
        seq.end()
    }
}

impl Serialize for Value<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Loki expects the timestamp as a decimal string of Unix nanoseconds.
        let nanos = i128::from(self.timestamp_millis) * NANOS_PER_MILLI;
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&format_args!("{nanos}"))?;
        tuple.serialize_element(&String::from_utf8_lossy(self.line))?;
        tuple.end()
    }
}

/// Serialise `batches` into one push request, one stream per batch.
pub fn encode_request(batches: &[&Batch]) -> Result<Vec<u8>, DeliveryError> {
    serde_json::to_vec(&PushRequest(batches))
        .map_err(|err| DeliveryError::Encoding(err.to_string()))
}

/// Serialise a single batch.
pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, DeliveryError> {
    encode_request(&[batch])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::UnitId;
    use crate::labels::LabelSet;
    use serde_json::{Value as Json, json};
    use std::sync::Arc;

    fn batch(labels: &[(&str, &str)], entries: Vec<(i64, &[u8])>) -> Batch {
        Batch {
            id: UnitId::REMAINDER,
            labels: Arc::new(LabelSet::from_pairs(labels.iter().copied()).expect("labels")),
            entries: entries.into_iter().map(|(ts, p)| (ts, p.to_vec())).collect(),
        }
    }

    fn parse(bytes: &[u8]) -> Json {
        serde_json::from_slice(bytes).expect("valid json")
    }

    #[test]
    fn encodes_single_stream() {
        let b = batch(
            &[("env", "prod"), ("app", "x")],
            vec![
                (1_700_000_000_123, b"first".as_slice()),
                (1_700_000_000_124, b"second".as_slice()),
            ],
        );
        let body = parse(&encode_batch(&b).expect("encode"));
        assert_eq!(
            body,
            json!({
                "streams": [{
                    "stream": {"app": "x", "env": "prod"},
                    "values": [
                        ["1700000000123000000", "first"],
                        ["1700000000124000000", "second"]
                    ]
                }]
            })
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let b = batch(&[("app", "x")], vec![(0, [0x66, 0xff, 0x6f].as_slice())]);
        let body = parse(&encode_batch(&b).expect("encode"));
        assert_eq!(body["streams"][0]["values"][0][1], "f\u{fffd}o");
    }

    #[test]
    fn escapes_control_characters() {
        let b = batch(&[("app", "x")], vec![(0, b"line \"one\"\n".as_slice())]);
        let raw = encode_batch(&b).expect("encode");
        let text = String::from_utf8(raw.clone()).expect("utf8 body");
        assert!(text.contains(r#"line \"one\"\n"#));
        assert_eq!(parse(&raw)["streams"][0]["values"][0][1], "line \"one\"\n");
    }

    #[test]
    fn several_batches_become_several_streams() {
        let a = batch(&[("app", "a")], vec![(1, b"x".as_slice())]);
        let b = batch(&[("app", "b")], vec![(2, b"y".as_slice())]);
        let body = parse(&encode_request(&[&a, &b]).expect("encode"));
        let streams = body["streams"].as_array().expect("array");
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1]["stream"]["app"], "b");
    }

    #[test]
    fn empty_label_set_serialises_as_empty_object() {
        let b = batch(&[], vec![(0, b"".as_slice())]);
        let body = parse(&encode_batch(&b).expect("encode"));
        assert_eq!(body["streams"][0]["stream"], json!({}));
        assert_eq!(body["streams"][0]["values"][0], json!(["0", ""]));
    }
}
