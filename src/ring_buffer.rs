#![allow(unsafe_code)]
//! Fixed-capacity ring of equal-sized byte chunks between one producer and one consumer.
//!
//! The ingest thread claims a chunk, fills it straight from the socket and commits it; the
//! persister claims the next completed chunk, decodes it in place and releases it. The ring
//! never copies payload bytes.
//!
//! # Ownership
//!
//! [`ChunkRingBuffer::split`] hands out exactly one [`ChunkWriter`] and one [`ChunkReader`].
//! Claiming a chunk borrows the half mutably, so neither side can hold two chunks at once.
//! A claimed chunk belongs to its side until the guard is committed or dropped:
//!
//! - [`WriteChunk::commit`] marks the chunk complete; dropping an uncommitted `WriteChunk`
//!   abandons it and the reader never sees it.
//! - Dropping a [`ReadChunk`] marks the reader done with it.
//!
//! # Overrun policy
//!
//! The writer never blocks. It takes the slot after its previous one, or one further if that
//! slot is still held by the reader. When the writer laps the reader, unread chunks are
//! overwritten; the reader notices the gap in write sequence numbers and jumps to the newest
//! completed chunk, counting the lost chunks in [`RingStats::chunks_skipped`]. A steadily
//! growing skip count means `num_chunks` is too small.
//!
//! # Thread Safety
//!
//! Slot indices and sequence numbers live under one `parking_lot::Mutex`. The per-side
//! completion flags are atomics written only by their own side, so finishing a chunk never
//! takes the lock.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AppResult, CaptureError};

/// Counters describing ring traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Chunks committed by the writer.
    pub chunks_written: u64,
    /// Chunks handed to the reader.
    pub chunks_read: u64,
    /// Committed chunks the reader never saw because the writer lapped it.
    pub chunks_skipped: u64,
    /// Times the writer stepped over the chunk the reader was still holding.
    pub reader_collisions: u64,
}

struct Slot {
    data: UnsafeCell<Box<[u8]>>,
}

struct Indices {
    reader: Option<usize>,
    writer: Option<usize>,
    /// Write sequence number of the committed (or in-progress) data in each slot.
    seqs: Vec<Option<u64>>,
    next_seq: u64,
    last_read_seq: Option<u64>,
}

struct Shared {
    chunk_size: usize,
    slots: Box<[Slot]>,
    indices: Mutex<Indices>,
    write_complete: AtomicBool,
    read_complete: AtomicBool,
    done: AtomicBool,
    chunks_written: AtomicU64,
    chunks_read: AtomicU64,
    chunks_skipped: AtomicU64,
    reader_collisions: AtomicU64,
}

// SAFETY: slot payloads are only reached through `WriteChunk` and `ReadChunk`. A slot is
// handed to the writer only when the reader does not hold it (or has finished with it), and
// to the reader only when it is not the writer's in-progress slot. Both decisions are made
// under `indices`, and the completion flags publish payload bytes with Release/Acquire, so
// no two threads ever access one slot's bytes concurrently.
unsafe impl Sync for Shared {}

impl Shared {
    fn stats(&self) -> RingStats {
        RingStats {
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            reader_collisions: self.reader_collisions.load(Ordering::Relaxed),
        }
    }

    fn done(&self) {
        self.done.store(true, Ordering::Release);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Circular array of `num_chunks` chunks of `chunk_size` bytes.
pub struct ChunkRingBuffer {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ChunkRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkRingBuffer")
            .field("chunk_size", &self.shared.chunk_size)
            .field("num_chunks", &self.shared.slots.len())
            .field("done", &self.shared.is_done())
            .field("stats", &self.shared.stats())
            .finish()
    }
}

impl ChunkRingBuffer {
    /// Allocate a ring of `num_chunks` chunks, each `chunk_size` bytes.
    ///
    /// # Errors
    /// `CaptureError::Configuration` if `chunk_size` is zero or `num_chunks` is below 2.
    pub fn new(chunk_size: usize, num_chunks: usize) -> AppResult<Self> {
        if chunk_size < 1 {
            return Err(CaptureError::Configuration(
                "ring buffer chunk size must be at least 1 byte".to_string(),
            ));
        }
        if num_chunks < 2 {
            return Err(CaptureError::Configuration(format!(
                "ring buffer needs at least 2 chunks, got {num_chunks}"
            )));
        }

        let slots = (0..num_chunks)
            .map(|_| Slot {
                data: UnsafeCell::new(vec![0u8; chunk_size].into_boxed_slice()),
            })
            .collect();

        Ok(Self {
            shared: Arc::new(Shared {
                chunk_size,
                slots,
                indices: Mutex::new(Indices {
                    reader: None,
                    writer: None,
                    seqs: vec![None; num_chunks],
                    next_seq: 0,
                    last_read_seq: None,
                }),
                write_complete: AtomicBool::new(true),
                read_complete: AtomicBool::new(true),
                done: AtomicBool::new(false),
                chunks_written: AtomicU64::new(0),
                chunks_read: AtomicU64::new(0),
                chunks_skipped: AtomicU64::new(0),
                reader_collisions: AtomicU64::new(0),
            }),
        })
    }

    /// Size of every chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /// Number of chunks in the ring.
    pub fn num_chunks(&self) -> usize {
        self.shared.slots.len()
    }

    /// Handle for signalling completion from outside the two pipeline threads.
    pub fn control(&self) -> RingControl {
        RingControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Consume the ring and return its only writer and only reader.
    pub fn split(self) -> (ChunkWriter, ChunkReader) {
        (
            ChunkWriter {
                shared: Arc::clone(&self.shared),
            },
            ChunkReader {
                shared: self.shared,
            },
        )
    }
}

/// Cloneable handle that can end the stream and observe counters.
#[derive(Clone)]
pub struct RingControl {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RingControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingControl")
            .field("done", &self.shared.is_done())
            .finish()
    }
}

impl RingControl {
    /// Declare the stream finished. One-way; it cannot be reset.
    pub fn done(&self) {
        self.shared.done();
    }

    /// Whether either side has declared the stream finished.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Snapshot of the ring counters.
    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// Producer half of the ring.
pub struct ChunkWriter {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("chunk_size", &self.shared.chunk_size)
            .finish()
    }
}

impl ChunkWriter {
    /// Claim the next chunk for writing.
    ///
    /// Returns `None` once the stream has been declared done; otherwise a chunk is always
    /// available, at the cost of overwriting unread data when the reader has fallen behind.
    pub fn chunk_for_writing(&mut self) -> Option<WriteChunk<'_>> {
        if self.shared.is_done() {
            return None;
        }
        let n = self.shared.slots.len();
        let mut idx = self.shared.indices.lock();

        let mut slot = idx.writer.map_or(0, |w| (w + 1) % n);
        if idx.reader == Some(slot) && !self.shared.read_complete.load(Ordering::Acquire) {
            slot = (slot + 1) % n;
            self.shared.reader_collisions.fetch_add(1, Ordering::Relaxed);
        }

        let seq = idx.next_seq;
        idx.next_seq += 1;
        idx.seqs[slot] = Some(seq);
        idx.writer = Some(slot);
        self.shared.write_complete.store(false, Ordering::Release);

        Some(WriteChunk {
            shared: &self.shared,
            slot,
            seq,
            committed: false,
        })
    }

    /// Size of every chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /// Handle that outlives borrows of this half, for signalling on exit paths.
    pub fn control(&self) -> RingControl {
        RingControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Declare the stream finished.
    pub fn done(&self) {
        self.shared.done();
    }

    /// Whether either side has declared the stream finished.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Snapshot of the ring counters.
    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// A chunk owned by the writer until committed or dropped.
pub struct WriteChunk<'a> {
    shared: &'a Shared,
    slot: usize,
    seq: u64,
    committed: bool,
}

impl std::fmt::Debug for WriteChunk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteChunk")
            .field("slot", &self.slot)
            .field("seq", &self.seq)
            .finish()
    }
}

impl WriteChunk<'_> {
    /// Write sequence number assigned at claim.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Mark the chunk complete and visible to the reader.
    pub fn commit(mut self) {
        self.committed = true;
        self.shared.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.shared.write_complete.store(true, Ordering::Release);
    }
}

impl std::ops::Deref for WriteChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the slot is the writer's in-progress slot; the reader skips it until
        // `write_complete` is set, which happens only when this guard goes away.
        unsafe { &**self.shared.slots[self.slot].data.get() }
    }
}

impl std::ops::DerefMut for WriteChunk<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `deref`; the `&mut self` receiver rules out aliasing on this side.
        unsafe { &mut **self.shared.slots[self.slot].data.get() }
    }
}

impl Drop for WriteChunk<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut idx = self.shared.indices.lock();
        idx.seqs[self.slot] = None;
        // Hand the sequence number back so the reader does not count a gap.
        if idx.next_seq == self.seq + 1 {
            idx.next_seq = self.seq;
        }
        self.shared.write_complete.store(true, Ordering::Release);
    }
}

/// Consumer half of the ring.
pub struct ChunkReader {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ChunkReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkReader")
            .field("chunk_size", &self.shared.chunk_size)
            .finish()
    }
}

impl ChunkReader {
    /// Claim the next completed chunk, or `None` if nothing new is ready.
    ///
    /// Chunks come back in write order. If the oldest unread chunk has already been
    /// overwritten, the reader jumps to the newest completed chunk instead.
    pub fn read_chunk(&mut self) -> Option<ReadChunk<'_>> {
        let n = self.shared.slots.len();
        let mut idx = self.shared.indices.lock();

        let busy = if self.shared.write_complete.load(Ordering::Acquire) {
            None
        } else {
            idx.writer
        };
        let expected = idx.last_read_seq.map_or(0, |s| s + 1);

        let next = idx.reader.map_or(0, |r| (r + 1) % n);
        let (slot, seq) = if Some(next) != busy && idx.seqs[next] == Some(expected) {
            (next, expected)
        } else {
            let mut oldest: Option<(usize, u64)> = None;
            let mut newest: Option<(usize, u64)> = None;
            for (i, seq) in idx.seqs.iter().enumerate() {
                let Some(seq) = *seq else { continue };
                if seq < expected || Some(i) == busy {
                    continue;
                }
                if oldest.map_or(true, |(_, s)| seq < s) {
                    oldest = Some((i, seq));
                }
                if newest.map_or(true, |(_, s)| seq > s) {
                    newest = Some((i, seq));
                }
            }
            match (oldest, newest) {
                (Some(first), _) if first.1 == expected => first,
                (Some(_), Some(latest)) => {
                    self.shared
                        .chunks_skipped
                        .fetch_add(latest.1 - expected, Ordering::Relaxed);
                    latest
                }
                _ => return None,
            }
        };

        idx.reader = Some(slot);
        idx.last_read_seq = Some(seq);
        self.shared.read_complete.store(false, Ordering::Release);
        self.shared.chunks_read.fetch_add(1, Ordering::Relaxed);

        Some(ReadChunk {
            shared: &self.shared,
            slot,
            seq,
        })
    }

    /// Size of every chunk in bytes.
    pub fn chunk_size(&self) -> usize {
        self.shared.chunk_size
    }

    /// Declare the stream finished.
    pub fn done(&self) {
        self.shared.done();
    }

    /// Whether either side has declared the stream finished.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Snapshot of the ring counters.
    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// A completed chunk owned by the reader until dropped.
pub struct ReadChunk<'a> {
    shared: &'a Shared,
    slot: usize,
    seq: u64,
}

impl std::fmt::Debug for ReadChunk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadChunk")
            .field("slot", &self.slot)
            .field("seq", &self.seq)
            .finish()
    }
}

impl ReadChunk<'_> {
    /// Write sequence number of the chunk's contents.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl std::ops::Deref for ReadChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the writer will not claim this slot while `read_complete` is false, and
        // the slot's bytes were published by the writer's Release store before the claim.
        unsafe { &**self.shared.slots[self.slot].data.get() }
    }
}

impl Drop for ReadChunk<'_> {
    fn drop(&mut self) {
        self.shared.read_complete.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fill(chunk: &mut [u8], value: u8) {
        chunk.iter_mut().for_each(|b| *b = value);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        assert!(ChunkRingBuffer::new(0, 4).unwrap_err().is_configuration());
        assert!(ChunkRingBuffer::new(16, 1).unwrap_err().is_configuration());
        assert!(ChunkRingBuffer::new(1, 2).is_ok());
    }

    #[test]
    fn nothing_to_read_before_first_write() {
        let (_writer, mut reader) = ChunkRingBuffer::new(8, 4).unwrap().split();
        assert!(reader.read_chunk().is_none());
    }

    #[test]
    fn writes_come_back_in_order() {
        let (mut writer, mut reader) = ChunkRingBuffer::new(4, 4).unwrap().split();
        for value in 1..=4u8 {
            let mut chunk = writer.chunk_for_writing().unwrap();
            fill(&mut chunk, value);
            chunk.commit();
        }
        for value in 1..=4u8 {
            let chunk = reader.read_chunk().unwrap();
            assert_eq!(&*chunk, &[value; 4]);
        }
        assert!(reader.read_chunk().is_none());
        assert_eq!(reader.stats().chunks_skipped, 0);
    }

    #[test]
    fn in_progress_chunk_is_invisible() {
        let (mut writer, mut reader) = ChunkRingBuffer::new(2, 3).unwrap().split();
        let mut chunk = writer.chunk_for_writing().unwrap();
        fill(&mut chunk, 7);
        assert!(reader.read_chunk().is_none());
        chunk.commit();
        assert_eq!(&*reader.read_chunk().unwrap(), &[7, 7]);
    }

    #[test]
    fn abandoned_chunk_is_never_read() {
        let (mut writer, mut reader) = ChunkRingBuffer::new(2, 3).unwrap().split();
        {
            let mut chunk = writer.chunk_for_writing().unwrap();
            fill(&mut chunk, 9);
        }
        assert!(reader.read_chunk().is_none());

        let mut chunk = writer.chunk_for_writing().unwrap();
        fill(&mut chunk, 1);
        chunk.commit();
        let read = reader.read_chunk().unwrap();
        assert_eq!(&*read, &[1, 1]);
        assert_eq!(read.seq(), 0);
        drop(read);
        assert_eq!(reader.stats().chunks_skipped, 0);
    }

    #[test]
    fn writer_steps_over_held_chunk() {
        let (mut writer, mut reader) = ChunkRingBuffer::new(1, 2).unwrap().split();
        for value in [1u8, 2] {
            let mut chunk = writer.chunk_for_writing().unwrap();
            fill(&mut chunk, value);
            chunk.commit();
        }
        // reader holds slot 0; the writer's next slot would be slot 0
        let held = reader.read_chunk().unwrap();
        assert_eq!(&*held, &[1]);
        let mut chunk = writer.chunk_for_writing().unwrap();
        fill(&mut chunk, 3);
        chunk.commit();
        assert_eq!(&*held, &[1]);
        drop(held);
        assert_eq!(writer.stats().reader_collisions, 1);
    }

    #[test]
    fn lapped_reader_skips_to_newest() {
        let (mut writer, mut reader) = ChunkRingBuffer::new(1, 3).unwrap().split();
        for value in 0..7u8 {
            let mut chunk = writer.chunk_for_writing().unwrap();
            fill(&mut chunk, value);
            chunk.commit();
        }
        let chunk = reader.read_chunk().unwrap();
        assert_eq!(&*chunk, &[6]);
        assert_eq!(chunk.seq(), 6);
        drop(chunk);
        assert_eq!(reader.stats().chunks_skipped, 6);
        assert!(reader.read_chunk().is_none());
    }

    #[test]
    fn done_refuses_production() {
        let (mut writer, reader) = ChunkRingBuffer::new(1, 2).unwrap().split();
        assert!(!writer.is_done());
        reader.done();
        assert!(writer.is_done());
        assert!(writer.chunk_for_writing().is_none());
    }

    #[test]
    fn control_handle_signals_both_sides() {
        let ring = ChunkRingBuffer::new(1, 2).unwrap();
        let control = ring.control();
        let (writer, reader) = ring.split();
        control.done();
        assert!(writer.is_done());
        assert!(reader.is_done());
    }

    #[test]
    fn concurrent_stream_is_ordered_or_skips_forward() {
        let (mut writer, mut reader) = ChunkRingBuffer::new(64, 8).unwrap().split();
        let total = 10_000u64;

        let producer = thread::spawn(move || {
            for i in 0..total {
                let Some(mut chunk) = writer.chunk_for_writing() else {
                    break;
                };
                chunk[..8].copy_from_slice(&i.to_le_bytes());
                let tail = (i % 251) as u8;
                chunk[8..].iter_mut().for_each(|b| *b = tail);
                chunk.commit();
            }
            writer.done();
        });

        let mut last: Option<u64> = None;
        loop {
            let done = reader.is_done();
            match reader.read_chunk() {
                Some(chunk) => {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(&chunk[..8]);
                    let value = u64::from_le_bytes(word);
                    assert_eq!(value, chunk.seq());
                    let tail = (value % 251) as u8;
                    assert!(chunk[8..].iter().all(|&b| b == tail));
                    if let Some(prev) = last {
                        assert!(value > prev);
                    }
                    last = Some(value);
                }
                None if done => break,
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();

        let stats = reader.stats();
        assert_eq!(last, Some(total - 1));
        assert_eq!(stats.chunks_written, total);
        assert_eq!(stats.chunks_read + stats.chunks_skipped, total);
    }
}
