//! Ownership tracking and release of a stream's pinned region.

use crate::allocator::PinnedAllocator;
use crate::error::PoolError;
use crate::layout::BufferLayout;
use crate::region::PinnedRegion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Who manages the memory frames are streamed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BufferOwnership {
    /// The transport layer allocates its own buffers.
    #[default]
    System,
    /// The stream writes into caller-provided buffers.
    Caller,
}

impl fmt::Display for BufferOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferOwnership::System => f.write_str("system"),
            BufferOwnership::Caller => f.write_str("caller"),
        }
    }
}

/// A worker's stream buffers: allocated once, lent to one device, released once.
///
/// Dropping the pool releases the region, so every exit path of a worker
/// returns the memory. The ownership tag is `Caller` from `lend()` until
/// release and `System` otherwise.
pub struct StreamBufferPool {
    region: Option<Arc<PinnedRegion>>,
    layout: BufferLayout,
    ownership: BufferOwnership,
}

impl StreamBufferPool {
    /// Allocate the contiguous region for `layout`.
    pub fn allocate(
        allocator: &dyn PinnedAllocator,
        layout: BufferLayout,
    ) -> Result<Self, PoolError> {
        let region = allocator.allocate(layout)?;

        info!(
            buffer_count = layout.buffer_count(),
            buffer_size = layout.buffer_size(),
            total_mb = layout.total_bytes() as f64 / (1024.0 * 1024.0),
            pinned = region.is_pinned(),
            "stream buffer pool allocated"
        );

        Ok(Self {
            region: Some(Arc::new(region)),
            layout,
            ownership: BufferOwnership::System,
        })
    }

    /// Slot count and slot size.
    #[must_use]
    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// Who the stream currently delivers into.
    #[must_use]
    pub fn ownership(&self) -> BufferOwnership {
        self.ownership
    }

    /// True once the region has been freed.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.region.is_none()
    }

    /// Number of holders besides the pool itself.
    #[must_use]
    pub fn borrowers(&self) -> usize {
        self.region
            .as_ref()
            .map_or(0, |r| Arc::strong_count(r).saturating_sub(1))
    }

    /// Hand the region to a device; ownership becomes `Caller`.
    pub fn lend(&mut self) -> Result<Arc<PinnedRegion>, PoolError> {
        let region = self.region.as_ref().ok_or(PoolError::AlreadyReleased)?;
        self.ownership = BufferOwnership::Caller;
        debug!(borrowers = self.borrowers() + 1, "stream buffers lent to device");
        Ok(Arc::clone(region))
    }

    /// Free the region. Refused while a device still holds it.
    pub fn release(&mut self) -> Result<(), PoolError> {
        let holders = self.borrowers();
        if self.region.is_none() {
            return Err(PoolError::AlreadyReleased);
        }
        if holders > 0 {
            return Err(PoolError::StillAttached { holders });
        }
        self.region = None;
        self.ownership = BufferOwnership::System;
        debug!(total_bytes = self.layout.total_bytes(), "stream buffers released");
        Ok(())
    }
}

impl Drop for StreamBufferPool {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            let holders = Arc::strong_count(&region) - 1;
            if holders > 0 {
                // The mapping stays alive until the last holder drops its Arc.
                warn!(holders, "stream buffer pool dropped while still lent to a device");
            }
            self.ownership = BufferOwnership::System;
        }
    }
}

impl fmt::Debug for StreamBufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBufferPool")
            .field("layout", &self.layout)
            .field("ownership", &self.ownership)
            .field("released", &self.is_released())
            .finish()
    }
}
