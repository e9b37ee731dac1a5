use std::time::Duration;

/// Policy applied when a producer's queue has no room for a log record.
///
/// Command records are not subject to this policy; they always retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullQueuePolicy {
    /// Retry until the backend frees space. Preserves every record at the
    /// cost of stalling the producer while the queue is full.
    BlockRetry,
    /// Drop the record and count it. The producer never stalls; see
    /// [`Hotlog::dropped_records`](crate::Hotlog::dropped_records).
    DropAndCount,
}

/// Tunables for the transport.
///
/// Constructed through [`Hotlog::builder`](crate::Hotlog::builder), which
/// validates the combination before anything is allocated.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-thread ring size in bytes. Must be a power of two and a multiple
    /// of the page size.
    pub(crate) queue_capacity: usize,
    /// When set, the backend pins itself to this CPU on startup.
    pub(crate) backend_cpu_affinity: Option<usize>,
    /// OS-visible name of the backend thread.
    pub(crate) backend_thread_name: String,
    /// Lower bound of the idle backoff sleep.
    pub(crate) backend_sleep_min: Duration,
    /// Upper bound of the idle backoff sleep.
    pub(crate) backend_sleep_max: Duration,
    /// Bytes drained from one context per sweep, bounding the latency any
    /// single noisy producer can impose on the others.
    pub(crate) backend_drain_budget: usize,
    /// What producers do when their queue is full.
    pub(crate) full_queue_policy: FullQueuePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 256 * 1024,
            backend_cpu_affinity: None,
            backend_thread_name: "hotlog-backend".to_string(),
            backend_sleep_min: Duration::from_micros(1),
            backend_sleep_max: Duration::from_millis(1),
            backend_drain_budget: 256 * 1024,
            full_queue_policy: FullQueuePolicy::BlockRetry,
        }
    }
}
