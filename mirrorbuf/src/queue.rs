// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, MirroredRegion};

/// Keeps each cursor on its own cache line to avoid false sharing between
/// the producer and the consumer.
#[repr(align(64))]
struct CacheAligned<T>(T);

/// A wait-free single-producer single-consumer byte queue over a mirrored
/// region.
///
/// The queue carries variable-sized byte slices. Both cursors are monotonic
/// 64-bit counters; the offset into the region is the cursor masked by
/// `capacity - 1`. Because the region is mirrored, every prepared or peeked
/// slice is contiguous, including across the wrap point.
///
/// Exactly one thread may act as the producer (`try_prepare`/`commit`) and
/// exactly one thread may act as the consumer (`peek`/`consume`). The
/// producer publishes `head` with release stores which the consumer observes
/// with acquire loads, and symmetrically for `tail`; there is no other
/// synchronization between the two sides.
pub struct SpscQueue {
    region: MirroredRegion,
    mask: u64,

    /// Written by the producer only.
    head: CacheAligned<AtomicU64>,
    /// Written by the consumer only.
    tail: CacheAligned<AtomicU64>,
}

// SAFETY: the cursor protocol hands each byte range to exactly one side at
// a time; see the struct documentation for the access contract.
unsafe impl Send for SpscQueue {}
unsafe impl Sync for SpscQueue {}

impl SpscQueue {
    /// All prepared sizes must be multiples of this, which keeps every
    /// prepared slice aligned to it.
    pub const ALIGNMENT: usize = 8;

    /// Creates a queue over a freshly mapped mirrored region of `capacity`
    /// bytes. The capacity rules of [`MirroredRegion::create`] apply.
    pub fn with_capacity(capacity: usize) -> Result<Self, Error> {
        let region = MirroredRegion::create(capacity)?;

        Ok(Self {
            mask: capacity as u64 - 1,
            region,
            head: CacheAligned(AtomicU64::new(0)),
            tail: CacheAligned(AtomicU64::new(0)),
        })
    }

    /// Returns the queue capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Returns the number of committed, unconsumed bytes.
    ///
    /// Exact when called from either endpoint thread; a snapshot otherwise.
    #[inline]
    pub fn len(&self) -> usize {
        // tail is read first so the later head read can never be older
        // than it, keeping the difference non-negative
        let tail = self.tail.0.load(Ordering::Acquire);
        let head = self.head.0.load(Ordering::Acquire);
        (head - tail) as usize
    }

    /// Returns true if the queue holds no committed bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producer side: returns a contiguous writable slice of exactly `n`
    /// bytes starting at the producer cursor, or `None` if fewer than `n`
    /// bytes are free. Never advances the cursor; the bytes become visible
    /// to the consumer only after [`commit`](Self::commit).
    ///
    /// `n` must be a multiple of [`ALIGNMENT`](Self::ALIGNMENT) so that
    /// every prepared slice starts on an aligned offset.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn try_prepare(&self, n: usize) -> Option<&mut [u8]> {
        debug_assert!(n % Self::ALIGNMENT == 0);

        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        let free = self.capacity() - (head - tail) as usize;

        if free < n {
            return None;
        }

        let offset = (head & self.mask) as usize;

        // SAFETY: offset < capacity and n <= capacity, so the slice stays
        // inside the 2x mirrored window; the bytes between head and
        // tail + capacity are owned by the producer until committed
        Some(unsafe { core::slice::from_raw_parts_mut(self.region.as_ptr().add(offset), n) })
    }

    /// Producer side: publishes the first `n` bytes of the previously
    /// prepared slice.
    #[inline]
    pub fn commit(&self, n: usize) {
        debug_assert!(n % Self::ALIGNMENT == 0);
        debug_assert!(n <= self.capacity());

        let head = self.head.0.load(Ordering::Relaxed);
        self.head.0.store(head + n as u64, Ordering::Release);
    }

    /// Consumer side: returns a contiguous readable slice covering every
    /// committed byte, or `None` if the queue is empty.
    #[inline]
    pub fn peek(&self) -> Option<&[u8]> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        let used = (head - tail) as usize;

        if used == 0 {
            return None;
        }

        let offset = (tail & self.mask) as usize;

        // SAFETY: used <= capacity, so the slice stays inside the mirrored
        // window; committed bytes are owned by the consumer until consumed
        Some(unsafe { core::slice::from_raw_parts(self.region.as_ptr().add(offset), used) })
    }

    /// Consumer side: releases the first `n` bytes of the readable slice
    /// back to the producer. `n` must not exceed the length last observed
    /// via [`peek`](Self::peek).
    #[inline]
    pub fn consume(&self, n: usize) {
        debug_assert!(n % Self::ALIGNMENT == 0);

        let tail = self.tail.0.load(Ordering::Relaxed);
        debug_assert!(n as u64 <= self.head.0.load(Ordering::Acquire) - tail);

        self.tail.0.store(tail + n as u64, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_size;
    use std::sync::Arc;

    fn queue() -> SpscQueue {
        SpscQueue::with_capacity(page_size()).unwrap()
    }

    #[test]
    fn basic_write_read() {
        let q = queue();

        let slot = q.try_prepare(16).unwrap();
        slot[..11].copy_from_slice(b"hello world");
        q.commit(16);

        let data = q.peek().unwrap();
        assert_eq!(&data[..11], b"hello world");
        assert_eq!(data.len(), 16);
        q.consume(16);

        assert!(q.peek().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn prepare_does_not_publish() {
        let q = queue();

        let slot = q.try_prepare(8).unwrap();
        slot.fill(0xAB);

        // nothing is visible until commit
        assert!(q.peek().is_none());
        assert_eq!(q.len(), 0);

        q.commit(8);
        assert_eq!(q.peek().unwrap().len(), 8);
    }

    #[test]
    fn full_queue_returns_none() {
        let q = queue();
        let capacity = q.capacity();

        let slot = q.try_prepare(capacity).unwrap();
        slot.fill(0xFF);
        q.commit(capacity);

        assert!(q.try_prepare(8).is_none());

        // freeing the head of the queue makes space again
        q.consume(8);
        assert!(q.try_prepare(8).is_some());
        assert!(q.try_prepare(16).is_none());
    }

    #[test]
    fn peek_returns_all_committed_bytes() {
        let q = queue();

        for i in 0..3u8 {
            let slot = q.try_prepare(8).unwrap();
            slot.fill(i);
            q.commit(8);
        }

        let data = q.peek().unwrap();
        assert_eq!(data.len(), 24);
        assert!(data[..8].iter().all(|&b| b == 0));
        assert!(data[8..16].iter().all(|&b| b == 1));
        assert!(data[16..24].iter().all(|&b| b == 2));
        q.consume(24);
    }

    #[test]
    // drive the cursors across several multiples of the capacity and check
    // that every record comes back intact in one contiguous slice
    fn wraparound() {
        let q = queue();
        let capacity = q.capacity();
        let record = 192;
        let rounds = 4 * capacity / record;

        for i in 0..rounds {
            let slot = q.try_prepare(record).unwrap();
            for (j, byte) in slot.iter_mut().enumerate() {
                *byte = (i + j) as u8;
            }
            q.commit(record);

            let data = q.peek().unwrap();
            assert_eq!(data.len(), record);
            for (j, &byte) in data.iter().enumerate() {
                assert_eq!(byte, (i + j) as u8);
            }
            q.consume(record);
        }

        assert!(q.is_empty());
    }

    #[test]
    fn contiguous_slice_across_the_wrap_point() {
        let q = queue();
        let capacity = q.capacity();

        // park the cursors three quarters of the way in
        let offset = capacity / 4 * 3;
        q.try_prepare(offset).unwrap();
        q.commit(offset);
        q.consume(offset);

        // this record straddles the end of the region
        let slot = q.try_prepare(capacity / 2).unwrap();
        for (i, byte) in slot.iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        q.commit(capacity / 2);

        let data = q.peek().unwrap();
        assert_eq!(data.len(), capacity / 2);
        for (i, &byte) in data.iter().enumerate() {
            assert_eq!(byte, (i % 251) as u8);
        }
        q.consume(capacity / 2);
    }

    #[test]
    // producer and consumer on separate threads; the consumer must observe
    // the exact byte sequence the producer wrote, and `len` must never
    // exceed the capacity
    fn spsc_fifo() {
        let q = Arc::new(queue());
        let capacity = q.capacity();
        let records: u64 = 100_000;

        let producer = {
            let q = q.clone();
            std::thread::spawn(move || {
                let mut seq: u64 = 0;
                while seq < records {
                    let size = 8 + (seq % 8) as usize * 8;
                    if let Some(slot) = q.try_prepare(size) {
                        slot[..8].copy_from_slice(&seq.to_le_bytes());
                        for byte in &mut slot[8..] {
                            *byte = seq as u8;
                        }
                        q.commit(size);
                        seq += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut expected: u64 = 0;
        while expected < records {
            let used = q.len();
            assert!(used <= capacity);

            let Some(data) = q.peek() else {
                std::thread::yield_now();
                continue;
            };

            let size = 8 + (expected % 8) as usize * 8;
            if data.len() < size {
                std::thread::yield_now();
                continue;
            }

            let mut seq = [0u8; 8];
            seq.copy_from_slice(&data[..8]);
            assert_eq!(u64::from_le_bytes(seq), expected);
            assert!(data[8..size].iter().all(|&b| b == expected as u8));

            q.consume(size);
            expected += 1;
        }

        producer.join().unwrap();
        assert!(q.is_empty());
    }
}
