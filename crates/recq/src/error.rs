use thiserror::Error;

/// Error types for queue operations.
///
/// All of these are non-fatal: the queue remains usable and the caller
/// decides whether to retry, back off, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The producer cannot fit a record of the requested size right now.
    ///
    /// Zero-length requests and requests above [`MAX_PAYLOAD`] always land
    /// here. Queue state is unchanged; retry after the consumer has
    /// released some records.
    ///
    /// [`MAX_PAYLOAD`]: crate::MAX_PAYLOAD
    #[error("not enough space for a {requested} byte record")]
    NotEnoughSpace {
        /// The payload size that was asked for.
        requested: usize,
    },

    /// No committed record is available to the consumer.
    #[error("no record available")]
    Empty,

    /// A chain block allocation is too small to hold the block header and
    /// a minimal record.
    #[error("block allocation of {size} bytes is below the {min} byte minimum")]
    InvalidBlockSize {
        /// The rejected allocation size.
        size: usize,
        /// The smallest accepted allocation size.
        min: usize,
    },

    /// Backing storage could not be allocated.
    #[error("failed to allocate {size} bytes of queue backing")]
    AllocationFailure {
        /// The allocation size that failed.
        size: usize,
    },
}
