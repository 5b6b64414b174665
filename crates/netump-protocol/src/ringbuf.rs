//! Lock-free SPSC (Single-Producer, Single-Consumer) queue of UMP words.
//!
//! Carries complete UMP packets from the network receive path into the
//! real-time render callback:
//!   - Zero heap allocation after creation (backing words pre-allocated)
//!   - Read and write indices on separate cache lines to avoid false sharing
//!   - Bounded: fixed capacity, the incoming packet is dropped on overflow
//!   - A packet is published only once all of its words are staged
//!
//! Typical flow:
//!   Producer (network task):  `push(words)` → stages words, publishes write index
//!   Consumer (render cycle):  `drain(f)` → reads up to a snapshot, publishes read index once
//!
//! The halves take `&mut self`, so each side has exactly one owner.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ump::{word_count, MAX_UMP_WORDS};

/// Default queue size in words.
pub const DEFAULT_QUEUE_WORDS: usize = 2048;

/// Cache line size for padding to avoid false sharing.
const CACHE_LINE: usize = 64;

/// Why a packet was not enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// Not enough free words for the whole packet. Nothing was published.
    Full,
    /// Fewer words than the Message Type requires.
    Malformed,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full => f.write_str("UMP queue full"),
            PushError::Malformed => f.write_str("truncated UMP packet"),
        }
    }
}

impl std::error::Error for PushError {}

/// Queue internals, shared between producer and consumer.
#[repr(C)]
struct UmpRingBufferInner {
    /// Next slot to write (only modified by producer)
    write: AtomicUsize,
    _pad_write: [u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],

    /// Next slot to read (only modified by consumer)
    read: AtomicUsize,
    _pad_read: [u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],

    /// Packets refused because the queue was full
    dropped: AtomicU64,

    words: Box<[AtomicU32]>,
    capacity: usize,
}

impl UmpRingBufferInner {
    fn new(capacity: usize) -> Self {
        assert!(
            capacity > MAX_UMP_WORDS,
            "Capacity must hold at least one full-size packet"
        );

        let words = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            write: AtomicUsize::new(0),
            _pad_write: [0u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
            read: AtomicUsize::new(0),
            _pad_read: [0u8; CACHE_LINE - std::mem::size_of::<AtomicUsize>()],
            dropped: AtomicU64::new(0),
            words,
            capacity,
        }
    }

    #[inline]
    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity {
            0
        } else {
            next
        }
    }

    /// Stage every word of one packet, then publish the write index.
    ///
    /// Must only be called from the producer side.
    #[inline]
    fn push(&self, words: &[u32]) -> Result<(), PushError> {
        let Some(&first) = words.first() else {
            return Err(PushError::Malformed);
        };
        let count = word_count(first);
        if words.len() < count {
            return Err(PushError::Malformed);
        }

        // Acquire pairs with the consumer's release: its reads of these
        // slots are finished before we overwrite them.
        let read = self.read.load(Ordering::Acquire);
        let mut cursor = self.write.load(Ordering::Relaxed);

        for &word in &words[..count] {
            self.words[cursor].store(word, Ordering::Relaxed);
            cursor = self.advance(cursor);
            if cursor == read {
                // Staged words stay unpublished and get overwritten later
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(PushError::Full);
            }
        }

        // Release ordering makes the staged words visible before the index moves
        self.write.store(cursor, Ordering::Release);
        Ok(())
    }

    /// Hand every packet published before entry to `f`, then publish the
    /// read index once. Returns the number of packets delivered.
    ///
    /// Must only be called from the consumer side.
    #[inline]
    fn drain(&self, f: &mut impl FnMut(&[u32])) -> usize {
        let mut cursor = self.read.load(Ordering::Relaxed);
        // Snapshot: packets pushed while draining wait for the next cycle
        let end = self.write.load(Ordering::Acquire);

        let mut packet = [0u32; MAX_UMP_WORDS];
        let mut delivered = 0;

        while cursor != end {
            packet[0] = self.words[cursor].load(Ordering::Relaxed);
            cursor = self.advance(cursor);

            let count = word_count(packet[0]);
            for slot in &mut packet[1..count] {
                *slot = self.words[cursor].load(Ordering::Relaxed);
                cursor = self.advance(cursor);
            }

            f(&packet[..count]);
            delivered += 1;
        }

        if delivered > 0 {
            self.read.store(cursor, Ordering::Release);
        }
        delivered
    }

    /// Number of published, unread words.
    #[inline]
    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        (write + self.capacity - read) % self.capacity
    }
}

/// Producer half of the UMP queue. Owned by the network receive path.
pub struct UmpProducer {
    inner: Arc<UmpRingBufferInner>,
}

/// Consumer half of the UMP queue. Owned by the render cycle.
pub struct UmpConsumer {
    inner: Arc<UmpRingBufferInner>,
}

/// Create a new UMP queue pair (producer, consumer) holding `capacity` words.
///
/// One word is always kept free, so at most `capacity - 1` words are queued.
pub fn ump_ring_buffer(capacity: usize) -> (UmpProducer, UmpConsumer) {
    let inner = Arc::new(UmpRingBufferInner::new(capacity));

    let producer = UmpProducer {
        inner: Arc::clone(&inner),
    };
    let consumer = UmpConsumer { inner };

    (producer, consumer)
}

impl UmpProducer {
    /// Enqueue one UMP packet (the leading words of `words`).
    ///
    /// On `Full` the packet is dropped whole and the counter in
    /// [`UmpProducer::dropped`] moves; previously queued packets are untouched.
    #[inline]
    pub fn push(&mut self, words: &[u32]) -> Result<(), PushError> {
        self.inner.push(words)
    }

    /// Packets dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Words currently queued.
    pub fn queued_words(&self) -> usize {
        self.inner.len()
    }
}

impl UmpConsumer {
    /// Drain everything published before this call, calling `f` for each
    /// packet. Never blocks or allocates.
    #[inline]
    pub fn drain(&mut self, mut f: impl FnMut(&[u32])) -> usize {
        self.inner.drain(&mut f)
    }

    /// Packets dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Words currently available.
    #[inline]
    pub fn available(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indices(consumer: &UmpConsumer) -> (usize, usize) {
        (
            consumer.inner.read.load(Ordering::Relaxed),
            consumer.inner.write.load(Ordering::Relaxed),
        )
    }

    fn collect(consumer: &mut UmpConsumer) -> Vec<Vec<u32>> {
        let mut out = Vec::new();
        consumer.drain(|words| out.push(words.to_vec()));
        out
    }

    #[test]
    fn push_drain_basic() {
        let (mut producer, mut consumer) = ump_ring_buffer(16);
        let note_on = [0x2090_3C7F]; // MIDI 1.0 Note On C4 vel 127

        producer.push(&note_on).unwrap();
        assert_eq!(consumer.available(), 1);
        assert_eq!(collect(&mut consumer), vec![vec![0x2090_3C7F]]);
        assert!(consumer.is_empty());
    }

    #[test]
    fn empty_drain_delivers_nothing() {
        let (_producer, mut consumer) = ump_ring_buffer(16);
        let mut calls = 0;
        assert_eq!(consumer.drain(|_| calls += 1), 0);
        assert_eq!(calls, 0);
    }

    #[test]
    fn mixed_sizes_fifo() {
        let (mut producer, mut consumer) = ump_ring_buffer(64);
        producer.push(&[0x2090_3C7F]).unwrap();
        producer.push(&[0x4090_3C00, 0xFFFF_0000]).unwrap();
        producer.push(&[0xB000_0001, 2, 3]).unwrap();
        producer.push(&[0x5000_0001, 2, 3, 4]).unwrap();

        assert_eq!(
            collect(&mut consumer),
            vec![
                vec![0x2090_3C7F],
                vec![0x4090_3C00, 0xFFFF_0000],
                vec![0xB000_0001, 2, 3],
                vec![0x5000_0001, 2, 3, 4],
            ]
        );
    }

    #[test]
    fn only_framing_table_words_are_queued() {
        let (mut producer, mut consumer) = ump_ring_buffer(16);
        // MT 2 is one word; the rest of the slice is not part of the packet
        producer.push(&[0x2080_3C00, 0xAAAA_AAAA, 0xBBBB_BBBB]).unwrap();
        assert_eq!(consumer.available(), 1);
        assert_eq!(collect(&mut consumer), vec![vec![0x2080_3C00]]);
    }

    #[test]
    fn malformed_packet_rejected() {
        let (mut producer, consumer) = ump_ring_buffer(16);
        assert_eq!(producer.push(&[]), Err(PushError::Malformed));
        assert_eq!(producer.push(&[0x4090_3C00]), Err(PushError::Malformed));
        assert_eq!(indices(&consumer), (0, 0));
        assert_eq!(producer.dropped(), 0);
    }

    #[test]
    fn full_queue_rejects_and_keeps_indices() {
        // 8 words, 7 usable
        let (mut producer, mut consumer) = ump_ring_buffer(8);
        producer.push(&[0xF000_0000, 1, 2, 3]).unwrap();
        producer.push(&[0x4000_0000, 1]).unwrap();
        let before = indices(&consumer);

        // Needs 4 words, only 1 free
        assert_eq!(producer.push(&[0x5000_0000, 1, 2, 3]), Err(PushError::Full));
        assert_eq!(indices(&consumer), before);
        assert_eq!(producer.dropped(), 1);
        assert_eq!(consumer.dropped(), 1);

        // Published packets are intact
        assert_eq!(
            collect(&mut consumer),
            vec![vec![0xF000_0000, 1, 2, 3], vec![0x4000_0000, 1]]
        );

        // Space freed: the same packet fits now
        producer.push(&[0x5000_0000, 1, 2, 3]).unwrap();
        assert_eq!(collect(&mut consumer), vec![vec![0x5000_0000, 1, 2, 3]]);
    }

    #[test]
    fn one_word_always_kept_free() {
        let (mut producer, _consumer) = ump_ring_buffer(8);
        for i in 0..7 {
            producer.push(&[0x2090_3C00 | i]).unwrap();
        }
        assert_eq!(producer.queued_words(), 7);
        assert_eq!(producer.push(&[0x2090_3C7F]), Err(PushError::Full));
    }

    #[test]
    fn wraparound_with_split_packets() {
        // Capacity 7 is not a multiple of 2 or 4, so packets straddle the end
        let (mut producer, mut consumer) = ump_ring_buffer(7);

        for round in 0u32..50 {
            producer.push(&[0x4000_0000 | round, round]).unwrap();
            producer.push(&[0xF000_0000 | round, 1, 2, round]).unwrap();
            assert_eq!(
                collect(&mut consumer),
                vec![
                    vec![0x4000_0000 | round, round],
                    vec![0xF000_0000 | round, 1, 2, round],
                ]
            );
        }
    }

    #[test]
    fn drain_uses_snapshot_of_write_index() {
        let (mut producer, mut consumer) = ump_ring_buffer(32);
        producer.push(&[0x2090_3C7F]).unwrap();
        producer.push(&[0x2090_3D7F]).unwrap();

        let mut seen = Vec::new();
        let delivered = consumer.drain(|words| {
            seen.push(words[0]);
            // Arrives mid-cycle: must wait for the next drain
            producer.push(&[0x2080_3C00]).unwrap();
        });

        assert_eq!(delivered, 2);
        assert_eq!(seen, vec![0x2090_3C7F, 0x2090_3D7F]);
        assert_eq!(consumer.available(), 2);
        assert_eq!(
            collect(&mut consumer),
            vec![vec![0x2080_3C00], vec![0x2080_3C00]]
        );
    }

    #[test]
    #[should_panic]
    fn tiny_capacity_panics() {
        let _ = ump_ring_buffer(4);
    }
}
