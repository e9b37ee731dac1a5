// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! This crate provides the asynchronous record transport for a low-latency
//! logging backend: producer threads hand off serialized log records at a
//! cost of tens of nanoseconds and never block on formatting or I/O, while
//! a single backend thread drains the records and dispatches them to one
//! or more sinks.
//!
//! The core of this crate is the `Hotlog` type, constructed with a builder
//! that attaches the sinks and tunes the transport. Each producer thread
//! lazily receives its own wait-free SPSC queue over a mirrored memory
//! region (see the `mirrorbuf` crate), so the hot path takes no locks and
//! performs no allocation. The backend worker cycles over the per-thread
//! queues with a bounded per-sweep budget, which keeps one noisy producer
//! from starving the others.
//!
//! Records from one thread reach the sinks in the exact order that thread
//! published them. No ordering is promised between records of different
//! threads: the interleaving follows the backend's sweep schedule, not
//! wall-clock timestamps. A thread that needs its records on disk can call
//! `flush`, which rides the same queue as the records and therefore
//! returns only after everything the thread published before it has been
//! dispatched.
//!
//! Serialization of log events and the concrete sink implementations are
//! deliberately outside this crate: the transport moves opaque payload
//! bytes. A payload is handed to every attached [`Sink`] exactly once,
//! padded to the 8 byte record alignment, so payloads are expected to be
//! self-describing.

#[macro_use]
mod macros;

mod backend;
mod config;
mod context;
mod error;
mod record;
mod sink;

pub mod datetime;
pub mod sys;

#[cfg(feature = "metrics")]
mod metrics;

pub use config::{Config, FullQueuePolicy};
pub use context::{ThreadContext, ThreadContextCollection};
pub use error::{BackendError, BackendErrorKind, Error};
pub use mirrorbuf::SpscQueue;
pub use record::{CommandCallback, MAX_PAYLOAD_BYTES};
pub use sink::{ErrorHandler, Sink};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use backend::BackendWorker;

/// An asynchronous log record transport.
///
/// Producer threads publish through [`publish`](Self::publish) or, for the
/// serialization layer above, through the queue of their
/// [`local_context`](Self::local_context). The backend worker owned by
/// this type dispatches the records to the attached sinks once
/// [`start`](Self::start) has been called.
pub struct Hotlog {
    contexts: Arc<ThreadContextCollection>,
    worker: BackendWorker,
    queue_capacity: usize,
    full_queue_policy: FullQueuePolicy,
}

impl Hotlog {
    /// Initialize a builder for a transport with default tunables and no
    /// sinks attached.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Starts the backend worker thread. Fails if it is already running.
    pub fn start(&self) -> Result<(), Error> {
        self.worker.start()
    }

    /// Stops the backend worker: asks it to finish, waits for its final
    /// sweep to drain every visible queue, and joins the thread. Records
    /// published after this call begins are delivered best-effort only.
    pub fn stop(&self) {
        self.worker.stop();
    }

    /// True while the backend worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Returns the calling thread's context, creating it on first use.
    pub fn local_context(&self) -> Result<Arc<ThreadContext>, Error> {
        self.contexts.local_context()
    }

    /// Publishes one log record from the calling thread.
    ///
    /// This is the fast path: wait-free unless the queue is full, in which
    /// case the configured [`FullQueuePolicy`] applies. The first call on
    /// a thread creates its context, which can fail if the mirrored queue
    /// cannot be mapped.
    pub fn publish(&self, payload: &[u8]) -> Result<(), Error> {
        if record::frame_size(payload.len()) > self.queue_capacity
            || payload.len() > MAX_PAYLOAD_BYTES
        {
            return Err(Error::PayloadTooLarge(payload.len()));
        }

        let context = self.contexts.local_context()?;

        match self.full_queue_policy {
            FullQueuePolicy::BlockRetry => {
                let mut spins = 0u32;
                while !context.try_publish(payload) {
                    if spins < 128 {
                        spins += 1;
                        core::hint::spin_loop();
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
            FullQueuePolicy::DropAndCount => {
                if !context.try_publish(payload) {
                    self.contexts.count_drop(payload.len());
                }
            }
        }

        Ok(())
    }

    /// Blocks until every record the calling thread published before this
    /// call has been dispatched to all sinks.
    ///
    /// The flush rides the thread's own queue as a command record, so the
    /// guarantee follows from per-queue FIFO order. Records from other
    /// threads are not covered, and records this thread publishes after
    /// the call are not required to be dispatched when it returns.
    ///
    /// If the backend worker is not running this returns immediately
    /// without enqueuing anything, since no one would ever signal
    /// completion. A [`stop`](Self::stop) that races with the flush
    /// likewise makes it return once the worker has exited; the dispatch
    /// guarantee only holds against a backend that stays running.
    pub fn flush(&self) {
        if !self.is_running() {
            return;
        }

        let Ok(context) = self.contexts.local_context() else {
            // this thread has never published and cannot create a queue;
            // there is nothing to wait for
            return;
        };

        let signal = Arc::new(FlushSignal::default());

        let mut callback: CommandCallback = {
            let signal = signal.clone();
            Box::new(move || signal.notify())
        };

        // unlike log records, the flush command always retries on a full
        // queue: dropping it would strand the waiter. The backend can stop
        // while we retry, so its liveness is re-checked on every attempt.
        loop {
            if !self.is_running() {
                return;
            }

            match context.try_emplace_command(callback) {
                Ok(()) => break,
                Err(returned) => {
                    callback = returned;
                    std::thread::yield_now();
                }
            }
        }

        metrics! {
            crate::metrics::FLUSH.increment();
        }

        // a stop() racing in after the enqueue can still retire the worker
        // before it reaches the command, so the wait is abandoned once the
        // worker has provably exited; nothing can signal after that
        signal.wait(|| self.worker.is_stopped());
    }

    /// Number of log records dropped under the drop-and-count policy.
    pub fn dropped_records(&self) -> u64 {
        self.contexts.dropped_records()
    }

    /// The registry of this transport's producer contexts.
    pub fn contexts(&self) -> &Arc<ThreadContextCollection> {
        &self.contexts
    }
}

impl Drop for Hotlog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One-shot completion primitive signalled by the backend when it reaches
/// the flush command in queue order.
#[derive(Default)]
struct FlushSignal {
    done: Mutex<bool>,
    waker: Condvar,
}

impl FlushSignal {
    fn notify(&self) {
        *self.done.lock() = true;
        self.waker.notify_one();
    }

    /// Blocks until notified. `abandoned` is consulted only after a wakeup
    /// without a signal; returning true from it means no signal can come
    /// anymore and the wait ends.
    fn wait<F: Fn() -> bool>(&self, abandoned: F) {
        let mut done = self.done.lock();
        while !*done {
            let result = self.waker.wait_for(&mut done, Duration::from_millis(1));
            if result.timed_out() && abandoned() {
                return;
            }
        }
    }
}

/// A type to construct a [`Hotlog`] transport.
pub struct Builder {
    config: Config,
    sinks: Vec<Box<dyn Sink>>,
    error_handler: ErrorHandler,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            sinks: Vec::new(),
            error_handler: sink::default_error_handler(),
        }
    }
}

impl Builder {
    /// Create a new builder with default tunables.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the per-thread ring size in bytes. Must be a power of two and
    /// a multiple of the page size. The default is 262,144.
    pub fn queue_capacity(mut self, bytes: usize) -> Self {
        self.config.queue_capacity = bytes;
        self
    }

    /// Pins the backend worker to the given CPU. Unset by default.
    pub fn backend_cpu_affinity(mut self, cpu_id: usize) -> Self {
        self.config.backend_cpu_affinity = Some(cpu_id);
        self
    }

    /// Sets the OS-visible name of the backend thread, truncated to the
    /// platform limit. The default is "hotlog-backend".
    pub fn backend_thread_name<T: Into<String>>(mut self, name: T) -> Self {
        self.config.backend_thread_name = name.into();
        self
    }

    /// Sets the lower bound of the backend's idle backoff sleep.
    pub fn backend_sleep_min(mut self, min: Duration) -> Self {
        self.config.backend_sleep_min = min;
        self
    }

    /// Sets the upper bound of the backend's idle backoff sleep.
    pub fn backend_sleep_max(mut self, max: Duration) -> Self {
        self.config.backend_sleep_max = max;
        self
    }

    /// Sets how many bytes the backend drains from one context per sweep.
    /// Smaller budgets reduce the latency a busy producer can impose on
    /// the others; larger budgets reduce sweep overhead.
    pub fn backend_drain_budget(mut self, bytes: usize) -> Self {
        self.config.backend_drain_budget = bytes;
        self
    }

    /// Sets what producers do when their queue is full. The default is
    /// [`FullQueuePolicy::BlockRetry`].
    pub fn full_queue_policy(mut self, policy: FullQueuePolicy) -> Self {
        self.config.full_queue_policy = policy;
        self
    }

    /// Attaches a sink. Every log record is dispatched to all attached
    /// sinks in attachment order.
    pub fn sink<T: Sink + 'static>(mut self, sink: T) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Installs the hook invoked on the backend thread when dispatch
    /// fails. The default writes to stderr.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BackendError) + Send + 'static,
    {
        self.error_handler = Box::new(handler);
        self
    }

    /// Consumes this `Builder` and attempts to construct a [`Hotlog`].
    ///
    /// Validation happens here, before any region is mapped or thread
    /// spawned; per-thread queues are still created lazily on first use.
    pub fn build(self) -> Result<Hotlog, Error> {
        let config = self.config;

        if config.queue_capacity == 0 || !config.queue_capacity.is_power_of_two() {
            return Err(mirrorbuf::Error::CapacityNotPowerOfTwo.into());
        }

        if config.queue_capacity % mirrorbuf::page_size() != 0 {
            return Err(mirrorbuf::Error::CapacityNotPageAligned.into());
        }

        if config.backend_sleep_min > config.backend_sleep_max {
            return Err(Error::InvalidSleepBounds);
        }

        if config.backend_drain_budget == 0 {
            return Err(Error::InvalidDrainBudget);
        }

        let contexts = Arc::new(ThreadContextCollection::new(config.queue_capacity));
        let queue_capacity = config.queue_capacity;
        let full_queue_policy = config.full_queue_policy;

        let worker = BackendWorker::new(contexts.clone(), config, self.sinks, self.error_handler);

        Ok(Hotlog {
            contexts,
            worker,
            queue_capacity,
            full_queue_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_validates_the_capacity() {
        assert!(matches!(
            Hotlog::builder().queue_capacity(0).build(),
            Err(Error::Buffer(mirrorbuf::Error::CapacityNotPowerOfTwo))
        ));
        assert!(matches!(
            Hotlog::builder().queue_capacity(12_345).build(),
            Err(Error::Buffer(mirrorbuf::Error::CapacityNotPowerOfTwo))
        ));
    }

    #[test]
    fn builder_validates_the_sleep_bounds() {
        let result = Hotlog::builder()
            .backend_sleep_min(Duration::from_millis(10))
            .backend_sleep_max(Duration::from_millis(1))
            .build();

        assert!(matches!(result, Err(Error::InvalidSleepBounds)));
    }

    #[test]
    fn builder_validates_the_drain_budget() {
        let result = Hotlog::builder().backend_drain_budget(0).build();
        assert!(matches!(result, Err(Error::InvalidDrainBudget)));
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let log = Hotlog::builder()
            .queue_capacity(mirrorbuf::page_size())
            .build()
            .unwrap();

        let oversized = vec![0u8; mirrorbuf::page_size()];
        assert!(matches!(
            log.publish(&oversized),
            Err(Error::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn start_twice_fails() {
        let log = Hotlog::builder().build().unwrap();

        log.start().unwrap();
        assert!(matches!(log.start(), Err(Error::AlreadyRunning)));
        log.stop();
        assert!(!log.is_running());
    }
}
