// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-producer-thread state and the registry that publishes it to the
//! backend worker.
//!
//! Every producer thread owns one `ThreadContext` per transport, created
//! lazily on first use and held in a thread-local slot. Creation publishes
//! the context to a pending list guarded by a mutex; the backend merges
//! that list into its working set during its sweeps. When the owning
//! thread exits, the thread-local destructor marks the context detached;
//! the backend drains whatever is left in its queue and then frees it.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;

use mirrorbuf::SpscQueue;

use crate::record::{self, CommandCallback};
use crate::{sys, Error};

/// Per-producer-thread transport state: the thread's identity and the SPSC
/// queue its records travel through.
pub struct ThreadContext {
    thread_id: u32,
    queue: SpscQueue,
    valid: AtomicBool,
    detached: AtomicBool,
}

impl ThreadContext {
    fn new(queue_capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            thread_id: sys::current_thread_id(),
            queue: SpscQueue::with_capacity(queue_capacity)?,
            valid: AtomicBool::new(true),
            detached: AtomicBool::new(false),
        })
    }

    /// OS id of the owning thread.
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// The queue owned by this context. Only the owning thread may use the
    /// producer operations; only the backend may use the consumer ones.
    pub fn queue(&self) -> &SpscQueue {
        &self.queue
    }

    /// Frames `payload` as one log record. Returns false when the queue
    /// does not currently have room; the caller's full-queue policy
    /// decides what happens then.
    #[inline]
    pub fn try_publish(&self, payload: &[u8]) -> bool {
        debug_assert!(payload.len() <= record::MAX_PAYLOAD_BYTES);
        record::try_emplace_log(&self.queue, payload)
    }

    /// Enqueues a command record whose callback the backend invokes when
    /// it dequeues the record. On a full queue the callback is handed back
    /// so the caller can retry.
    pub fn try_emplace_command(&self, callback: CommandCallback) -> Result<(), CommandCallback> {
        record::try_emplace_command(&self.queue, callback)
    }

    /// True until the backend deregisters the context.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }
}

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static LOCAL_CONTEXTS: RefCell<LocalContexts> = RefCell::new(LocalContexts(Vec::new()));
}

/// This thread's context slots, one per transport the thread has logged
/// through. The destructor runs on thread exit and detaches every held
/// context; freeing them is the backend's job once they are drained.
struct LocalContexts(Vec<(u64, Arc<ThreadContext>)>);

impl Drop for LocalContexts {
    fn drop(&mut self) {
        for (_, context) in &self.0 {
            context.detach();
        }
    }
}

/// Registry of the active producer contexts of one transport.
///
/// Producers call [`local_context`](Self::local_context) from their own
/// thread; the backend worker is the only caller of the snapshot and
/// reclaim operations.
pub struct ThreadContextCollection {
    id: u64,
    queue_capacity: usize,
    pending: Mutex<Vec<Arc<ThreadContext>>>,
    has_pending: AtomicBool,
    dropped_records: AtomicU64,
    dropped_bytes: AtomicU64,
}

impl ThreadContextCollection {
    pub(crate) fn new(queue_capacity: usize) -> Self {
        Self {
            id: NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed),
            queue_capacity,
            pending: Mutex::new(Vec::new()),
            has_pending: AtomicBool::new(false),
            dropped_records: AtomicU64::new(0),
            dropped_bytes: AtomicU64::new(0),
        }
    }

    /// Returns this thread's context, creating and publishing it on first
    /// use. Creation maps the context's mirrored queue, so it can fail;
    /// the failure surfaces to the calling producer. The returned
    /// reference is stable for the lifetime of the thread.
    pub fn local_context(&self) -> Result<Arc<ThreadContext>, Error> {
        LOCAL_CONTEXTS.with(|local| {
            let mut local = local.borrow_mut();

            if let Some((_, context)) = local.0.iter().find(|(id, _)| *id == self.id) {
                return Ok(context.clone());
            }

            let context = Arc::new(ThreadContext::new(self.queue_capacity)?);

            {
                let mut pending = self.pending.lock();
                pending.push(context.clone());
                // setting the flag while holding the lock means a snapshot
                // that observes the flag also observes the push
                self.has_pending.store(true, Ordering::Release);
            }

            metrics! {
                crate::metrics::CONTEXT_CREATE.increment();
            }

            local.0.push((self.id, context.clone()));
            Ok(context)
        })
    }

    /// Backend side: merges newly published contexts into the backend's
    /// working vector, preserving insertion order. Amortized: the lock is
    /// taken only when the pending flag is set.
    pub(crate) fn snapshot(&self, contexts: &mut Vec<Arc<ThreadContext>>) {
        if self.has_pending.swap(false, Ordering::AcqRel) {
            contexts.append(&mut self.pending.lock());
        }
    }

    /// Backend side: drops every context whose owning thread has exited
    /// and whose queue is fully drained.
    pub(crate) fn reclaim(&self, contexts: &mut Vec<Arc<ThreadContext>>) {
        contexts.retain(|context| {
            if context.is_detached() && context.queue().is_empty() {
                context.invalidate();

                metrics! {
                    crate::metrics::CONTEXT_RECLAIM.increment();
                }

                false
            } else {
                true
            }
        });
    }

    pub(crate) fn count_drop(&self, bytes: usize) {
        self.dropped_records.fetch_add(1, Ordering::Relaxed);
        self.dropped_bytes.fetch_add(bytes as u64, Ordering::Relaxed);

        metrics! {
            crate::metrics::RECORD_DROP.increment();
            crate::metrics::RECORD_DROP_BYTE.add(bytes as u64);
        }
    }

    /// Number of log records dropped under the drop-and-count policy.
    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }

    /// Number of log record bytes dropped under the drop-and-count policy.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes.load(Ordering::Relaxed)
    }
}
