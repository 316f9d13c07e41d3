//! Binary framing for entries stored in the ring buffer.
//!
//! Each frame is laid out little endian as:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0 | 4 | frame length, header included |
//! | 4 | 8 | timestamp in milliseconds (`i64`) |
//! | 12 | 4 | label set id (`u32`) |
//! | 16 | 4 | payload length (`u32`) |
//! | 20 | n | payload bytes |
//!
//! The frame length lets a reader skip a frame whose body is damaged without
//! losing its place in the buffer.

use crate::error::CodecError;
use crate::labels::LabelSetId;

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 20;
/// Largest frame the format can describe.
pub const MAX_FRAME_LEN: usize = i32::MAX as usize;
/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;

/// A log entry as drained from the ring buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp_millis: i64,
    pub label_set: LabelSetId,
    pub payload: Vec<u8>,
}

impl LogEntry {
    pub fn new(timestamp_millis: i64, label_set: LabelSetId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp_millis,
            label_set,
            payload: payload.into(),
        }
    }

    /// Borrow the entry in the form the encoder accepts.
    pub fn view(&self) -> EntryRef<'_> {
        EntryRef {
            timestamp_millis: self.timestamp_millis,
            label_set: self.label_set,
            payload: &self.payload,
        }
    }
}

/// Borrowed entry used on the producer path to avoid copying the payload
/// before it reaches the ring buffer.
#[derive(Clone, Copy, Debug)]
pub struct EntryRef<'a> {
    pub timestamp_millis: i64,
    pub label_set: LabelSetId,
    pub payload: &'a [u8],
}

/// Total frame size for a payload of `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> Result<usize, CodecError> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLarge(payload_len));
    }
    Ok(HEADER_LEN + payload_len)
}

/// Encode only the fixed header of `entry`.
///
/// The ring buffer writes the header and the payload as two slices so that
/// frames may wrap around the end of its storage.
pub fn encode_header(entry: EntryRef<'_>) -> Result<[u8; HEADER_LEN], CodecError> {
    let len = frame_len(entry.payload.len())?;
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&(len as u32).to_le_bytes());
    header[4..12].copy_from_slice(&entry.timestamp_millis.to_le_bytes());
    header[12..16].copy_from_slice(&entry.label_set.get().to_le_bytes());
    header[16..20].copy_from_slice(&(entry.payload.len() as u32).to_le_bytes());
    Ok(header)
}

/// Encode `entry` into `dst`, returning the number of bytes written.
pub fn encode_into(entry: EntryRef<'_>, dst: &mut [u8]) -> Result<usize, CodecError> {
    let header = encode_header(entry)?;
    let len = HEADER_LEN + entry.payload.len();
    if dst.len() < len {
        return Err(CodecError::Truncated {
            needed: len,
            available: dst.len(),
        });
    }
    dst[..HEADER_LEN].copy_from_slice(&header);
    dst[HEADER_LEN..len].copy_from_slice(entry.payload);
    Ok(len)
}

/// Encode `entry` into a freshly allocated frame.
pub fn encode(entry: EntryRef<'_>) -> Result<Vec<u8>, CodecError> {
    let mut frame = vec![0u8; frame_len(entry.payload.len())?];
    encode_into(entry, &mut frame)?;
    Ok(frame)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

/// Read and validate the length prefix of the frame starting at `offset`.
pub fn peek_frame_len(bytes: &[u8], offset: usize) -> Result<usize, CodecError> {
    let available = bytes.len().saturating_sub(offset);
    if available < 4 {
        return Err(CodecError::Truncated {
            needed: 4,
            available,
        });
    }
    let raw = read_u32(bytes, offset);
    let len = raw as usize;
    if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
        return Err(CodecError::InvalidLength(raw));
    }
    Ok(len)
}

/// Decode the frame starting at `offset`, returning the entry and the offset
/// of the following frame.
pub fn decode(bytes: &[u8], offset: usize) -> Result<(LogEntry, usize), CodecError> {
    let len = peek_frame_len(bytes, offset)?;
    let available = bytes.len() - offset;
    if available < len {
        return Err(CodecError::Truncated {
            needed: len,
            available,
        });
    }
    let frame = &bytes[offset..offset + len];
    let payload_len = read_u32(frame, 16);
    if HEADER_LEN + payload_len as usize != len {
        return Err(CodecError::LengthMismatch {
            frame: len as u32,
            payload: payload_len,
        });
    }
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&frame[4..12]);
    let entry = LogEntry {
        timestamp_millis: i64::from_le_bytes(ts),
        label_set: LabelSetId::from_raw(read_u32(frame, 12)),
        payload: frame[HEADER_LEN..].to_vec(),
    };
    Ok((entry, offset + len))
}
