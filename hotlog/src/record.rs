// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The wire record model.
//!
//! Every record travels through a thread's queue as
//! `[u16 total_size][u16 type_tag][payload..]` in little-endian order, with
//! `total_size` covering the header and rounded up to the queue alignment.
//! Log record payloads are opaque to the transport; command records carry a
//! callback which the backend invokes on dequeue.

use mirrorbuf::SpscQueue;

pub(crate) const HEADER_BYTES: usize = 4;
pub(crate) const ALIGNMENT: usize = SpscQueue::ALIGNMENT;

pub(crate) const TAG_LOG: u16 = 1;
pub(crate) const TAG_COMMAND: u16 = 2;

/// The largest payload a single record can carry once the header and the
/// alignment padding are accounted for.
pub const MAX_PAYLOAD_BYTES: usize = (u16::MAX as usize & !(ALIGNMENT - 1)) - HEADER_BYTES;

/// A callback executed by the backend worker when its command record is
/// dequeued.
pub type CommandCallback = Box<dyn FnOnce() + Send>;

/// Size of the whole record on the wire for a payload of `payload_len`
/// bytes, header included, rounded up to the queue alignment.
#[inline]
pub(crate) fn frame_size(payload_len: usize) -> usize {
    (HEADER_BYTES + payload_len + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Frames `payload` as a log record at the producer cursor. Returns false
/// when the queue does not currently have room; nothing is written in that
/// case.
#[inline]
pub(crate) fn try_emplace_log(queue: &SpscQueue, payload: &[u8]) -> bool {
    let total = frame_size(payload.len());
    debug_assert!(total <= u16::MAX as usize);

    let Some(slot) = queue.try_prepare(total) else {
        return false;
    };

    slot[0..2].copy_from_slice(&(total as u16).to_le_bytes());
    slot[2..4].copy_from_slice(&TAG_LOG.to_le_bytes());
    slot[HEADER_BYTES..HEADER_BYTES + payload.len()].copy_from_slice(payload);
    queue.commit(total);

    true
}

/// Frames `callback` as a command record. The callback rides the queue as
/// a thin pointer; the backend takes ownership back when it dequeues the
/// record. On a full queue the callback is handed back for retry.
pub(crate) fn try_emplace_command(
    queue: &SpscQueue,
    callback: CommandCallback,
) -> Result<(), CommandCallback> {
    let total = frame_size(core::mem::size_of::<u64>());

    let Some(slot) = queue.try_prepare(total) else {
        return Err(callback);
    };

    let raw = Box::into_raw(Box::new(callback)) as usize as u64;

    slot[0..2].copy_from_slice(&(total as u16).to_le_bytes());
    slot[2..4].copy_from_slice(&TAG_COMMAND.to_le_bytes());
    slot[HEADER_BYTES..HEADER_BYTES + 8].copy_from_slice(&raw.to_le_bytes());
    queue.commit(total);

    Ok(())
}

/// One record decoded from the head of a readable slice.
pub(crate) enum Frame<'a> {
    Log { payload: &'a [u8], total: usize },
    Command { callback: CommandCallback, total: usize },
    Unknown { tag: u16, total: usize },
}

/// Decodes the record at the head of `avail`, or returns `None` when fewer
/// bytes than one whole record are present.
///
/// For command records this takes ownership of the embedded callback, so
/// the caller must consume the record afterwards; decoding the same bytes
/// twice is not allowed.
pub(crate) fn decode(avail: &[u8]) -> Option<Frame<'_>> {
    if avail.len() < HEADER_BYTES {
        return None;
    }

    let total = u16::from_le_bytes([avail[0], avail[1]]) as usize;
    let tag = u16::from_le_bytes([avail[2], avail[3]]);

    debug_assert!(total >= HEADER_BYTES && total % ALIGNMENT == 0);

    if avail.len() < total {
        return None;
    }

    match tag {
        TAG_LOG => Some(Frame::Log {
            payload: &avail[HEADER_BYTES..total],
            total,
        }),
        TAG_COMMAND => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&avail[HEADER_BYTES..HEADER_BYTES + 8]);
            let ptr = u64::from_le_bytes(raw) as usize as *mut CommandCallback;

            // SAFETY: the pointer was produced by try_emplace_command on
            // the producer side, and the single consumer takes it back
            // exactly once before consuming the record
            let callback = unsafe { *Box::from_raw(ptr) };

            Some(Frame::Command { callback, total })
        }
        tag => Some(Frame::Unknown { tag, total }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorbuf::page_size;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn frame_sizes_are_aligned() {
        assert_eq!(frame_size(0), 8);
        assert_eq!(frame_size(4), 8);
        assert_eq!(frame_size(5), 16);
        assert_eq!(frame_size(12), 16);
        assert_eq!(frame_size(13), 24);
        assert_eq!(frame_size(MAX_PAYLOAD_BYTES), u16::MAX as usize & !(ALIGNMENT - 1));
    }

    #[test]
    fn log_record_roundtrip() {
        let queue = SpscQueue::with_capacity(page_size()).unwrap();

        assert!(try_emplace_log(&queue, b"hello"));

        let avail = queue.peek().unwrap();
        let Some(Frame::Log { payload, total }) = decode(avail) else {
            panic!("expected a log record");
        };

        assert_eq!(total, 16);
        assert_eq!(&payload[..5], b"hello");
        queue.consume(total);
        assert!(queue.is_empty());
    }

    #[test]
    fn command_record_roundtrip() {
        let queue = SpscQueue::with_capacity(page_size()).unwrap();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        let callback: CommandCallback = Box::new(move || flag.store(true, Ordering::Release));
        assert!(try_emplace_command(&queue, callback).is_ok());

        let avail = queue.peek().unwrap();
        let Some(Frame::Command { callback, total }) = decode(avail) else {
            panic!("expected a command record");
        };

        callback();
        queue.consume(total);

        assert!(fired.load(Ordering::Acquire));
        assert!(queue.is_empty());
    }

    #[test]
    fn emplace_fails_cleanly_when_full() {
        let capacity = page_size();
        let queue = SpscQueue::with_capacity(capacity).unwrap();

        let filler = vec![0u8; capacity - HEADER_BYTES];
        assert!(try_emplace_log(&queue, &filler));

        assert!(!try_emplace_log(&queue, b"no room"));

        let callback: CommandCallback = Box::new(|| {});
        assert!(try_emplace_command(&queue, callback).is_err());

        // the full record is still intact
        let avail = queue.peek().unwrap();
        assert_eq!(avail.len(), capacity);
    }

    #[test]
    fn partial_header_is_not_decoded() {
        assert!(decode(&[]).is_none());
        assert!(decode(&[16, 0]).is_none());
    }
}
