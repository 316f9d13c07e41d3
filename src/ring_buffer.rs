//! Fixed-capacity, multi-producer single-consumer byte ring.
//!
//! Producers append length-prefixed [`codec`] frames under a short critical
//! section that only copies the frame bytes; they never wait for space. The
//! single consumer blocks on a condition variable until data arrives or its
//! wait elapses, copies whole frames out under the lock and decodes them
//! after releasing it.
//!
//! Frames may wrap around the end of the storage, so live bytes never exceed
//! the configured capacity and no space is lost to padding.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::error;
use parking_lot::{Condvar, Mutex};

use crate::codec::{self, EntryRef, HEADER_LEN, LogEntry};
use crate::error::{CodecError, LogError};

const PAGE_SIZE: usize = 4096;

/// How the ring's storage is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BufferAllocation {
    /// Zeroed heap allocation; the OS maps pages on first write.
    Heap,
    /// Zeroed allocation with every page touched up front so producers never
    /// pay for first-touch page faults.
    #[default]
    Direct,
}

impl BufferAllocation {
    /// Map the `use_off_heap_buffer` switch onto an allocation strategy.
    pub fn from_off_heap(flag: bool) -> Self {
        if flag { Self::Direct } else { Self::Heap }
    }

    fn allocate(self, capacity: usize) -> Box<[u8]> {
        let mut storage = vec![0u8; capacity].into_boxed_slice();
        if self == Self::Direct {
            for i in (0..storage.len()).step_by(PAGE_SIZE) {
                storage[i] = std::hint::black_box(0);
            }
        }
        storage
    }
}

struct RingState {
    storage: Box<[u8]>,
    head: usize,
    used: usize,
    entries: usize,
    sealed: bool,
    woken: bool,
    consumer_waiting: bool,
}

impl RingState {
    fn write_at(&mut self, pos: usize, bytes: &[u8]) {
        let cap = self.storage.len();
        let first = bytes.len().min(cap - pos);
        self.storage[pos..pos + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        self.storage[..rest].copy_from_slice(&bytes[first..]);
    }

    fn read_at(&self, pos: usize, dst: &mut [u8]) {
        let cap = self.storage.len();
        let first = dst.len().min(cap - pos);
        dst[..first].copy_from_slice(&self.storage[pos..pos + first]);
        let rest = dst.len() - first;
        dst[first..].copy_from_slice(&self.storage[..rest]);
    }

    fn advance(&mut self, bytes: usize, entries: usize) {
        self.head = (self.head + bytes) % self.storage.len();
        self.used -= bytes;
        self.entries -= entries;
    }
}

/// Bounded byte ring shared by every producer of one logging system.
pub struct RingBuffer {
    state: Mutex<RingState>,
    data_ready: Condvar,
    capacity: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
    corrupt: AtomicU64,
}

impl RingBuffer {
    /// Allocate a ring holding at most `capacity` bytes of frames.
    pub fn new(capacity: usize, allocation: BufferAllocation) -> Self {
        Self {
            state: Mutex::new(RingState {
                storage: allocation.allocate(capacity),
                head: 0,
                used: 0,
                entries: 0,
                sealed: false,
                woken: false,
                consumer_waiting: false,
            }),
            data_ready: Condvar::new(),
            capacity,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            corrupt: AtomicU64::new(0),
        }
    }

    /// Append `entry` if it fits.
    ///
    /// Never waits for space: a full or sealed buffer rejects the entry and
    /// bumps the dropped counter.
    pub fn offer(&self, entry: EntryRef<'_>) -> Result<(), LogError> {
        let len = HEADER_LEN.saturating_add(entry.payload.len());
        let header = match codec::encode_header(entry) {
            Ok(header) if len <= self.capacity => header,
            _ => {
                return Err(self.reject(LogError::Oversized {
                    size: len,
                    limit: self.capacity,
                }));
            }
        };

        let mut state = self.state.lock();
        if state.sealed {
            drop(state);
            return Err(self.reject(LogError::Stopped));
        }
        if self.capacity - state.used < len {
            drop(state);
            return Err(self.reject(LogError::BufferFull));
        }
        let tail = (state.head + state.used) % self.capacity;
        state.write_at(tail, &header);
        state.write_at((tail + HEADER_LEN) % self.capacity, entry.payload);
        state.used += len;
        state.entries += 1;
        // Counted under the lock so a drained entry is always already accepted.
        self.accepted.fetch_add(1, Ordering::Relaxed);
        let notify = state.consumer_waiting;
        drop(state);

        if notify {
            self.data_ready.notify_one();
        }
        Ok(())
    }

    fn reject(&self, err: LogError) -> LogError {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        err
    }

    /// Remove up to `max_entries` whole frames totalling at most `max_bytes`.
    ///
    /// Waits up to `max_wait` for the first frame. A wait too long to express
    /// as an instant lasts until data arrives or [`wake`](Self::wake) is
    /// called. One frame is always returned when any is buffered, even if it
    /// alone exceeds `max_bytes`.
    /// Must only be called from the single consumer.
    pub fn drain(&self, max_bytes: usize, max_entries: usize, max_wait: Duration) -> Vec<LogEntry> {
        let deadline = Instant::now().checked_add(max_wait);
        let mut state = self.state.lock();
        while state.used == 0 && !state.woken {
            state.consumer_waiting = true;
            let timed_out = match deadline {
                Some(deadline) => self.data_ready.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.data_ready.wait(&mut state);
                    false
                }
            };
            state.consumer_waiting = false;
            if timed_out {
                break;
            }
        }
        state.woken = false;
        if state.used == 0 {
            return Vec::new();
        }

        let max_entries = max_entries.max(1);
        let mut take = 0;
        let mut count = 0;
        let mut damaged = false;
        while take < state.used && count < max_entries {
            let mut len_buf = [0u8; 4];
            state.read_at((state.head + take) % self.capacity, &mut len_buf);
            let len = u32::from_le_bytes(len_buf) as usize;
            if len < HEADER_LEN || len > state.used - take {
                damaged = true;
                break;
            }
            if count > 0 && take + len > max_bytes {
                break;
            }
            take += len;
            count += 1;
        }

        let mut frames = vec![0u8; take];
        state.read_at(state.head, &mut frames);
        state.advance(take, count);
        if damaged {
            // The length prefix is unusable, so nothing after it can be framed.
            let lost = state.entries.max(1);
            let (used, entries) = (state.used, state.entries);
            state.advance(used, entries);
            self.corrupt.fetch_add(lost as u64, Ordering::Relaxed);
            error!("ring buffer frame header corrupt; discarded {lost} buffered entries");
        }
        drop(state);

        self.decode_frames(&frames, count)
    }

    fn decode_frames(&self, frames: &[u8], count: usize) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(count);
        let mut offset = 0;
        while offset < frames.len() {
            match codec::decode(frames, offset) {
                Ok((entry, next)) => {
                    entries.push(entry);
                    offset = next;
                }
                Err(err) => {
                    self.corrupt.fetch_add(1, Ordering::Relaxed);
                    error!("skipping corrupt ring buffer frame: {err}");
                    match (err, codec::peek_frame_len(frames, offset)) {
                        (CodecError::LengthMismatch { .. }, Ok(len)) => offset += len,
                        _ => break,
                    }
                }
            }
        }
        entries
    }

    /// Interrupt a consumer blocked in [`drain`](Self::drain).
    pub fn wake(&self) {
        self.state.lock().woken = true;
        self.data_ready.notify_one();
    }

    /// Reject every later [`offer`](Self::offer) with [`LogError::Stopped`].
    pub fn seal(&self) {
        self.state.lock().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of frames not yet drained.
    pub fn len_bytes(&self) -> usize {
        self.state.lock().used
    }

    /// Entries not yet drained.
    pub fn len_entries(&self) -> usize {
        self.state.lock().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len_bytes() == 0
    }

    /// Entries accepted by [`offer`](Self::offer) since construction.
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Entries rejected by [`offer`](Self::offer) since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Entries discarded on drain because their frames were damaged.
    pub fn corrupt(&self) -> u64 {
        self.corrupt.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn poke(&self, offset_from_head: usize, bytes: &[u8]) {
        let mut state = self.state.lock();
        let pos = (state.head + offset_from_head) % self.capacity;
        state.write_at(pos, bytes);
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len_bytes", &self.len_bytes())
            .field("accepted", &self.accepted())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSetId;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;

    const LABELS: LabelSetId = LabelSetId::from_raw(0);

    fn entry(payload: &[u8]) -> EntryRef<'_> {
        EntryRef {
            timestamp_millis: 42,
            label_set: LABELS,
            payload,
        }
    }

    fn payloads(entries: &[LogEntry]) -> Vec<&[u8]> {
        entries.iter().map(|e| e.payload.as_slice()).collect()
    }

    #[rstest]
    #[case(BufferAllocation::Heap)]
    #[case(BufferAllocation::Direct)]
    fn offers_and_drains_in_order(#[case] allocation: BufferAllocation) {
        let ring = RingBuffer::new(1024, allocation);
        for payload in [b"a".as_slice(), b"b".as_slice(), b"c".as_slice()] {
            ring.offer(entry(payload)).expect("offer");
        }
        assert_eq!(ring.len_entries(), 3);
        let drained = ring.drain(usize::MAX, usize::MAX, Duration::ZERO);
        assert_eq!(payloads(&drained), vec![b"a".as_slice(), b"b".as_slice(), b"c".as_slice()]);
        assert!(ring.is_empty());
        assert_eq!(ring.accepted(), 3);
    }

    #[test]
    fn rejects_when_full_without_blocking() {
        let ring = RingBuffer::new(HEADER_LEN * 2 + 2, BufferAllocation::Heap);
        ring.offer(entry(b"1")).expect("first fits");
        ring.offer(entry(b"2")).expect("second fits");
        let start = Instant::now();
        assert_eq!(ring.offer(entry(b"3")), Err(LogError::BufferFull));
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(ring.dropped(), 1);
        assert_eq!(ring.len_bytes(), ring.capacity());
    }

    #[test]
    fn rejects_frames_larger_than_capacity() {
        let ring = RingBuffer::new(64, BufferAllocation::Heap);
        let err = ring.offer(entry(&[0u8; 64])).expect_err("oversized");
        assert_eq!(
            err,
            LogError::Oversized {
                size: HEADER_LEN + 64,
                limit: 64
            }
        );
    }

    #[test]
    fn frames_wrap_around_storage_end() {
        let ring = RingBuffer::new(HEADER_LEN * 3 + 10, BufferAllocation::Heap);
        ring.offer(entry(b"first")).expect("offer");
        ring.offer(entry(b"second")).expect("offer");
        assert_eq!(ring.drain(usize::MAX, 1, Duration::ZERO).len(), 1);
        ring.offer(entry(b"wrapped!")).expect("wrapping offer");
        let drained = ring.drain(usize::MAX, usize::MAX, Duration::ZERO);
        assert_eq!(payloads(&drained), vec![b"second".as_slice(), b"wrapped!".as_slice()]);
    }

    #[test]
    fn drain_respects_byte_and_entry_caps() {
        let ring = RingBuffer::new(1024, BufferAllocation::Heap);
        for _ in 0..5 {
            ring.offer(entry(b"0123456789")).expect("offer");
        }
        let frame = HEADER_LEN + 10;
        assert_eq!(ring.drain(frame * 2, usize::MAX, Duration::ZERO).len(), 2);
        assert_eq!(ring.drain(usize::MAX, 1, Duration::ZERO).len(), 1);
        assert_eq!(ring.drain(1, usize::MAX, Duration::ZERO).len(), 1, "one frame minimum");
        assert_eq!(ring.len_entries(), 1);
    }

    #[test]
    fn drain_times_out_when_empty() {
        let ring = RingBuffer::new(128, BufferAllocation::Heap);
        let start = Instant::now();
        assert!(ring.drain(usize::MAX, usize::MAX, Duration::from_millis(20)).is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn drain_wakes_on_offer() {
        let ring = Arc::new(RingBuffer::new(128, BufferAllocation::Heap));
        let producer = Arc::clone(&ring);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.offer(entry(b"late")).expect("offer");
        });
        let drained = ring.drain(usize::MAX, usize::MAX, Duration::from_secs(5));
        handle.join().expect("producer thread");
        assert_eq!(payloads(&drained), vec![b"late".as_slice()]);
    }

    #[test]
    fn wake_interrupts_waiting_drain() {
        let ring = Arc::new(RingBuffer::new(128, BufferAllocation::Heap));
        let waker = Arc::clone(&ring);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake();
        });
        let start = Instant::now();
        assert!(ring.drain(usize::MAX, usize::MAX, Duration::from_secs(5)).is_empty());
        assert!(start.elapsed() < Duration::from_secs(4));
        handle.join().expect("waker thread");
    }

    #[test]
    fn unbounded_wait_ends_on_wake() {
        let ring = Arc::new(RingBuffer::new(128, BufferAllocation::Heap));
        let waker = Arc::clone(&ring);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake();
        });
        assert!(ring.drain(usize::MAX, usize::MAX, Duration::MAX).is_empty());
        handle.join().expect("waker thread");
    }

    #[rstest]
    #[case(0)]
    #[case(37)]
    fn frame_filling_the_whole_ring_round_trips(#[case] head_offset: usize) {
        let capacity = 4096;
        let ring = RingBuffer::new(capacity, BufferAllocation::Heap);
        if head_offset > 0 {
            // Move the head so the full-size frame wraps around the storage end.
            let filler = vec![b'f'; head_offset];
            ring.offer(entry(&filler)).expect("filler");
            ring.drain(usize::MAX, usize::MAX, Duration::ZERO);
        }
        let payload: Vec<u8> = (0..capacity - HEADER_LEN)
            .map(|i| (i % 251) as u8)
            .collect();
        ring.offer(entry(&payload)).expect("frame of exactly the capacity fits");
        assert_eq!(ring.len_bytes(), capacity);
        assert_eq!(ring.offer(entry(b"")), Err(LogError::BufferFull));

        let drained = ring.drain(usize::MAX, usize::MAX, Duration::ZERO);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].payload, payload);
        assert_eq!(drained[0].timestamp_millis, 42);
        assert!(ring.is_empty());

        let too_big = vec![0u8; capacity - HEADER_LEN + 1];
        assert!(matches!(
            ring.offer(entry(&too_big)),
            Err(LogError::Oversized { .. })
        ));
    }

    #[test]
    fn sealed_ring_rejects_offers() {
        let ring = RingBuffer::new(128, BufferAllocation::Heap);
        ring.offer(entry(b"kept")).expect("offer");
        ring.seal();
        assert_eq!(ring.offer(entry(b"late")), Err(LogError::Stopped));
        assert_eq!(ring.drain(usize::MAX, usize::MAX, Duration::ZERO).len(), 1);
    }

    #[test]
    fn skips_frame_with_mismatched_payload_length() {
        let ring = RingBuffer::new(256, BufferAllocation::Heap);
        ring.offer(entry(b"bad")).expect("offer");
        ring.offer(entry(b"good")).expect("offer");
        ring.poke(16, &99u32.to_le_bytes());
        let drained = ring.drain(usize::MAX, usize::MAX, Duration::ZERO);
        assert_eq!(payloads(&drained), vec![b"good".as_slice()]);
        assert_eq!(ring.corrupt(), 1);
    }

    #[test]
    fn discards_remainder_after_unreadable_length() {
        let ring = RingBuffer::new(256, BufferAllocation::Heap);
        ring.offer(entry(b"ok")).expect("offer");
        ring.offer(entry(b"lost")).expect("offer");
        ring.offer(entry(b"lost too")).expect("offer");
        ring.poke(HEADER_LEN + 2, &1u32.to_le_bytes());
        let drained = ring.drain(usize::MAX, usize::MAX, Duration::ZERO);
        assert_eq!(payloads(&drained), vec![b"ok".as_slice()]);
        assert_eq!(ring.corrupt(), 2);
        assert!(ring.is_empty());
        ring.offer(entry(b"fresh")).expect("ring usable after reset");
        assert_eq!(ring.drain(usize::MAX, usize::MAX, Duration::ZERO).len(), 1);
    }
}
