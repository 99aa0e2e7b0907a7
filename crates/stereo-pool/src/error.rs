//! Errors raised while sizing, allocating or releasing stream buffers.

use thiserror::Error;

/// Failure modes of the stream buffer pool.
///
/// Allocation and release failures are fatal to the worker that owns the
/// pool; allocation is never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The requested layout cannot describe a real region.
    #[error("invalid buffer layout: {reason}")]
    InvalidLayout { reason: String },

    /// The host refused to map the region.
    #[error("failed to allocate {requested} bytes for stream buffers: {reason}")]
    AllocationFailed { requested: usize, reason: String },

    /// The region was mapped but could not be page-locked and pinning is required.
    #[error("failed to pin {requested} bytes of stream buffer memory: {reason}")]
    PinFailed { requested: usize, reason: String },

    /// Release was requested while the device still references the region.
    #[error("stream buffers still referenced by {holders} holder(s); stop the device first")]
    StillAttached { holders: usize },

    /// The region was already handed back.
    #[error("stream buffers already released")]
    AlreadyReleased,

    #[error("slot {slot} does not exist in a region of {count} buffers")]
    NoSuchSlot { slot: usize, count: usize },

    /// A frame larger than one buffer was written.
    #[error("{len} bytes do not fit slot {slot} of {capacity} bytes")]
    SlotOverflow {
        slot: usize,
        capacity: usize,
        len: usize,
    },
}
