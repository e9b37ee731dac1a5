use thiserror::Error;

/// Errors returned while allocating regions and queues.
#[derive(Error, Debug)]
pub enum Error {
    #[error("capacity must be a non-zero power of two")]
    CapacityNotPowerOfTwo,
    #[error("capacity must be a multiple of the page size")]
    CapacityNotPageAligned,
    #[error("alignment must be a power of two and the size must be non-zero")]
    InvalidLayout,
    #[error("the allocation failed")]
    OutOfMemory,
    #[error("os error: {0}")]
    Os(#[from] std::io::Error),
}
