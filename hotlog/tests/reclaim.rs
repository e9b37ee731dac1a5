// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Reclamation of contexts whose producer thread has exited.

use std::io;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use hotlog::{Hotlog, Sink, ThreadContext};

#[derive(Clone, Default)]
struct VecSink {
    records: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Sink for VecSink {
    fn on_record(&mut self, payload: &[u8]) -> Result<(), io::Error> {
        self.records.lock().push(payload.to_vec());
        Ok(())
    }
}

fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
// a record published right before its thread exits is still delivered, and
// the orphaned context is freed once it has been drained
fn exited_thread_is_drained_then_freed() {
    let sink = VecSink::default();
    let log = Arc::new(Hotlog::builder().sink(sink.clone()).build().unwrap());

    log.start().unwrap();

    let weak: Weak<ThreadContext> = {
        let log = log.clone();
        std::thread::spawn(move || {
            log.publish(b"orphaned").unwrap();
            Arc::downgrade(&log.local_context().unwrap())
        })
        .join()
        .unwrap()
    };

    // the record must arrive even though its producer is gone and nothing
    // was flushed
    assert!(eventually(|| {
        sink.records
            .lock()
            .iter()
            .any(|payload| payload.starts_with(b"orphaned"))
    }));

    // and the context itself must be reclaimed by the backend
    assert!(eventually(|| weak.upgrade().is_none()));

    // exactly once: reclamation must not replay the record
    assert_eq!(sink.records.lock().len(), 1);

    log.stop();
}

#[test]
fn live_threads_are_not_reclaimed() {
    let log = Arc::new(Hotlog::builder().build().unwrap());
    log.start().unwrap();

    let weak = Arc::downgrade(&log.local_context().unwrap());

    // give the backend plenty of reclamation passes
    std::thread::sleep(Duration::from_millis(50));

    assert!(weak.upgrade().is_some());
    assert!(log.local_context().unwrap().is_valid());

    log.stop();
}
