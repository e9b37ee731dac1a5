use metriken::{metric, Counter};

#[metric(
    name = "log_context_create",
    description = "number of producer thread contexts created"
)]
pub static CONTEXT_CREATE: Counter = Counter::new();

#[metric(
    name = "log_context_reclaim",
    description = "number of detached thread contexts reclaimed by the backend"
)]
pub static CONTEXT_RECLAIM: Counter = Counter::new();

#[metric(
    name = "log_dispatch",
    description = "number of log records dispatched to the sinks"
)]
pub static RECORD_DISPATCH: Counter = Counter::new();

#[metric(
    name = "log_dispatch_byte",
    description = "number of record bytes dispatched to the sinks"
)]
pub static RECORD_DISPATCH_BYTE: Counter = Counter::new();

#[metric(
    name = "log_drop",
    description = "number of log records dropped due to full queues"
)]
pub static RECORD_DROP: Counter = Counter::new();

#[metric(
    name = "log_drop_byte",
    description = "number of bytes dropped due to full queues"
)]
pub static RECORD_DROP_BYTE: Counter = Counter::new();

#[metric(name = "log_flush", description = "number of synchronous flushes")]
pub static FLUSH: Counter = Counter::new();

#[metric(
    name = "log_dispatch_ex",
    description = "number of exceptions while dispatching records to sinks"
)]
pub static DISPATCH_EX: Counter = Counter::new();
