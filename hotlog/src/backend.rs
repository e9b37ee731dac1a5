// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The single consumer thread.
//!
//! The worker cycles over every published thread context, drains each
//! queue up to a per-sweep byte budget, dispatches log records to the
//! sinks, and executes command records in queue order. An idle pass backs
//! off progressively: busy-spin, then yield, then sleep with a doubling
//! delay between the configured bounds. Detached contexts are reclaimed on
//! a fixed sweep cadence.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::context::{ThreadContext, ThreadContextCollection};
use crate::error::{BackendError, BackendErrorKind};
use crate::record::{self, Frame};
use crate::sink::{ErrorHandler, Sink};
use crate::{sys, Config, Error};

const STOPPED: usize = 0;
const STARTING: usize = 1;
const RUNNING: usize = 2;
const STOPPING: usize = 3;

/// Sweeps between reclamation passes.
const RECLAIM_INTERVAL: u64 = 64;
/// Idle passes spent busy-spinning before yielding.
const SPIN_PASSES: u32 = 64;
/// Idle passes spent yielding before sleeping.
const YIELD_PASSES: u32 = 64;

pub(crate) struct BackendWorker {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: AtomicUsize,
    contexts: Arc<ThreadContextCollection>,
    config: Config,
    /// The sinks and error hook live here while the worker is stopped and
    /// move onto its thread while it runs.
    outputs: Mutex<Option<Outputs>>,
}

struct Outputs {
    sinks: Vec<Box<dyn Sink>>,
    on_error: ErrorHandler,
}

impl BackendWorker {
    pub(crate) fn new(
        contexts: Arc<ThreadContextCollection>,
        config: Config,
        sinks: Vec<Box<dyn Sink>>,
        on_error: ErrorHandler,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicUsize::new(STOPPED),
                contexts,
                config,
                outputs: Mutex::new(Some(Outputs { sinks, on_error })),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Spawns the worker thread. Fails if it is already running.
    pub(crate) fn start(&self) -> Result<(), Error> {
        if self
            .shared
            .state
            .compare_exchange(STOPPED, STARTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        // the worker loop runs while the state reads RUNNING, so it must be
        // published before the thread starts
        self.shared.state.store(RUNNING, Ordering::Release);

        let shared = self.shared.clone();
        match std::thread::Builder::new().spawn(move || worker(shared)) {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.state.store(STOPPED, Ordering::Release);
                Err(err.into())
            }
        }
    }

    /// Asks the worker to stop, waits for its final drain, and joins it.
    /// A no-op if the worker is not running.
    pub(crate) fn stop(&self) {
        if self
            .shared
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }

        // normally the worker already stored STOPPED; this recovers the
        // state machine if it died without reaching its exit path
        let _ = self.shared.state.compare_exchange(
            STOPPING,
            STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn is_running(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == RUNNING
    }

    /// True once the worker thread has exited (or never started). Unlike
    /// `!is_running()`, this stays false while a stop is still draining.
    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STOPPED
    }
}

fn worker(shared: Arc<Shared>) {
    let config = &shared.config;

    let Some(mut outputs) = shared.outputs.lock().take() else {
        shared.state.store(STOPPED, Ordering::Release);
        return;
    };

    if let Err(err) = sys::set_thread_name(&config.backend_thread_name) {
        (outputs.on_error)(&BackendError {
            thread_id: None,
            kind: BackendErrorKind::ThreadName(err),
        });
    }

    if let Some(cpu) = config.backend_cpu_affinity {
        if let Err(err) = sys::set_cpu_affinity(cpu) {
            (outputs.on_error)(&BackendError {
                thread_id: None,
                kind: BackendErrorKind::Affinity(err),
            });
        }
    }

    let mut contexts: Vec<Arc<ThreadContext>> = Vec::new();
    let mut backoff = Backoff::new(config.backend_sleep_min, config.backend_sleep_max);
    let mut sweeps: u64 = 0;

    while shared.state.load(Ordering::Acquire) == RUNNING {
        shared.contexts.snapshot(&mut contexts);

        let mut dispatched = 0;
        for context in &contexts {
            dispatched += drain(context, config.backend_drain_budget, &mut outputs);
        }

        sweeps += 1;
        if sweeps % RECLAIM_INTERVAL == 0 {
            shared.contexts.reclaim(&mut contexts);
        }

        if dispatched == 0 {
            backoff.idle();
        } else {
            backoff.reset();
        }
    }

    // stopping: one final sweep over the contexts visible right now. Each
    // queue is drained of the bytes it held when the sweep reached it, so
    // a producer that keeps publishing cannot keep the worker alive and
    // stop() always completes; records committed after that point are
    // delivered on a best-effort basis only.
    shared.contexts.snapshot(&mut contexts);
    for context in &contexts {
        let pending = context.queue().len();
        drain(context, pending, &mut outputs);
    }

    shared.contexts.reclaim(&mut contexts);

    *shared.outputs.lock() = Some(outputs);
    shared.state.store(STOPPED, Ordering::Release);
}

/// Drains up to `budget` bytes of whole records from one context.
///
/// Each record's bytes are consumed unconditionally once its handler
/// returns, failed or not, so the queue can never desynchronize. Returns
/// the number of bytes consumed.
fn drain(context: &ThreadContext, budget: usize, outputs: &mut Outputs) -> usize {
    let queue = context.queue();
    let mut consumed = 0;

    while consumed < budget {
        let Some(avail) = queue.peek() else {
            break;
        };

        let Some(frame) = record::decode(avail) else {
            break;
        };

        let total = match frame {
            Frame::Log { payload, total } => {
                for sink in &mut outputs.sinks {
                    if let Err(err) = sink.on_record(payload) {
                        (outputs.on_error)(&BackendError {
                            thread_id: Some(context.thread_id()),
                            kind: BackendErrorKind::Sink(err),
                        });

                        metrics! {
                            crate::metrics::DISPATCH_EX.increment();
                        }
                    }
                }

                metrics! {
                    crate::metrics::RECORD_DISPATCH.increment();
                    crate::metrics::RECORD_DISPATCH_BYTE.add(total as u64);
                }

                total
            }
            Frame::Command { callback, total } => {
                callback();
                total
            }
            Frame::Unknown { tag, total } => {
                (outputs.on_error)(&BackendError {
                    thread_id: Some(context.thread_id()),
                    kind: BackendErrorKind::UnknownTag(tag),
                });

                total
            }
        };

        queue.consume(total);
        consumed += total;
    }

    consumed
}

/// Idle backoff: spin, then yield, then sleep with exponentially growing
/// delay. Any dispatched byte resets it.
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
    passes: u32,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
            passes: 0,
        }
    }

    fn reset(&mut self) {
        self.passes = 0;
        self.current = self.min;
    }

    fn idle(&mut self) {
        if self.passes < SPIN_PASSES {
            core::hint::spin_loop();
        } else if self.passes < SPIN_PASSES + YIELD_PASSES {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.current);
            self.current = (self.current * 2).min(self.max);
        }

        self.passes = self.passes.saturating_add(1);
    }
}
