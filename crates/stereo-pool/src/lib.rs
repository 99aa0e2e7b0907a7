//! Pinned stream buffer regions for caller-managed camera acquisition.
//!
//! A camera streaming into caller-owned memory needs one contiguous block of
//! `buffer_count × buffer_size` bytes, page-locked so the transport layer can
//! DMA into it, and handed to the device before acquisition starts. This crate
//! owns that block and its lifecycle.
//!
//! # Memory Flow
//!
//! ```text
//! 1. BufferLayout::for_payload() rounds the payload size to the transport quantum
//! 2. StreamBufferPool::allocate() maps + locks one contiguous region
//! 3. lend() hands an Arc<PinnedRegion> to the device (ownership -> Caller)
//! 4. The device claims a slot per delivered frame and returns it on release
//! 5. The device drops its Arc after acquisition ends
//! 6. release() (or Drop) frees the region (ownership -> System)
//! ```
//!
//! Releasing while the device still holds the region is refused, so the memory
//! can never be freed underneath an active stream.
//!
//! # Example
//!
//! ```
//! use stereo_pool::{BufferLayout, BufferOwnership, HostAllocator, StreamBufferPool, TransportClass};
//!
//! let layout = BufferLayout::for_payload(1500, 4, TransportClass::Usb3Vision).unwrap();
//! assert_eq!(layout.buffer_size(), 2048);
//!
//! let mut pool = StreamBufferPool::allocate(&HostAllocator::unpinned(), layout).unwrap();
//! let region = pool.lend().unwrap();
//! assert_eq!(pool.ownership(), BufferOwnership::Caller);
//!
//! drop(region);
//! pool.release().unwrap();
//! assert_eq!(pool.ownership(), BufferOwnership::System);
//! ```

pub mod allocator;
pub mod error;
pub mod layout;
pub mod pool;
pub mod region;

pub use allocator::{HostAllocator, PinPolicy, PinnedAllocator};
pub use error::PoolError;
pub use layout::{round_up, BufferLayout, TransportClass, USB3_ALIGNMENT};
pub use pool::{BufferOwnership, StreamBufferPool};
pub use region::PinnedRegion;
