// Copyright 2023 IOP Systems, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::BackendError;

/// An output destination for dispatched log records.
///
/// Sinks are owned by the backend worker and invoked only from its thread,
/// in the order they were attached.
pub trait Sink: Send {
    /// Handles one log record payload.
    ///
    /// The slice is valid only for the duration of the call. It includes
    /// the alignment padding of the wire format, so payloads are expected
    /// to be self-describing; decoding them belongs to the formatting
    /// layer above this crate.
    ///
    /// Returning an error reports the failure through the error hook; the
    /// record is considered handled either way and the worker moves on.
    fn on_record(&mut self, payload: &[u8]) -> Result<(), std::io::Error>;
}

/// Hook invoked on the backend thread when dispatch fails.
pub type ErrorHandler = Box<dyn Fn(&BackendError) + Send>;

pub(crate) fn default_error_handler() -> ErrorHandler {
    Box::new(|error| eprintln!("hotlog backend: {error}"))
}
