use thiserror::Error;

/// Errors returned while constructing and operating the transport.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Buffer(#[from] mirrorbuf::Error),
    #[error("payload of {0} bytes does not fit in a single record")]
    PayloadTooLarge(usize),
    #[error("the backend worker is already running")]
    AlreadyRunning,
    #[error("the minimum backend sleep must not exceed the maximum")]
    InvalidSleepBounds,
    #[error("the backend drain budget must be non-zero")]
    InvalidDrainBudget,
    #[error("os error: {0}")]
    Os(#[from] std::io::Error),
}

/// Information handed to the error hook when the backend worker fails to
/// dispatch a record or to apply its thread settings.
///
/// Dispatch failures never interrupt the worker: the offending record's
/// bytes are consumed and the sweep continues.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct BackendError {
    /// OS id of the producer thread whose record was being dispatched, when
    /// the failure is tied to a record.
    pub thread_id: Option<u32>,
    pub kind: BackendErrorKind,
}

#[derive(Error, Debug)]
pub enum BackendErrorKind {
    #[error("sink failed: {0}")]
    Sink(std::io::Error),
    #[error("unknown record tag {0}")]
    UnknownTag(u16),
    #[error("could not pin the backend thread: {0}")]
    Affinity(std::io::Error),
    #[error("could not name the backend thread: {0}")]
    ThreadName(std::io::Error),
}
