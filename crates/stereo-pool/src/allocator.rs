//! Host-side allocation of pinned regions.

use crate::error::PoolError;
use crate::layout::BufferLayout;
use crate::region::PinnedRegion;
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Source of pinned memory for stream and decode buffers.
///
/// The host implementation maps anonymous pages; a GPU runtime would supply
/// its own page-locked allocator behind the same trait.
pub trait PinnedAllocator: Send + Sync {
    /// Allocate one contiguous region for `layout`.
    fn allocate(&self, layout: BufferLayout) -> Result<PinnedRegion, PoolError>;
}

/// How strictly page locking is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PinPolicy {
    /// Lock pages, fail the allocation if the host refuses.
    Required,
    /// Lock pages, fall back to pageable memory with a warning.
    #[default]
    BestEffort,
    /// Never lock pages.
    Disabled,
}

/// Allocator backed by anonymous memory maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAllocator {
    policy: PinPolicy,
}

impl HostAllocator {
    /// Allocator applying `policy` to every region.
    #[must_use]
    pub fn new(policy: PinPolicy) -> Self {
        Self { policy }
    }

    /// Allocator that never locks pages (tests, simulated devices).
    #[must_use]
    pub fn unpinned() -> Self {
        Self::new(PinPolicy::Disabled)
    }

    /// Policy the allocator was built with.
    #[must_use]
    pub fn policy(&self) -> PinPolicy {
        self.policy
    }
}

impl PinnedAllocator for HostAllocator {
    fn allocate(&self, layout: BufferLayout) -> Result<PinnedRegion, PoolError> {
        let requested = layout.total_bytes();
        let map = MmapMut::map_anon(requested).map_err(|e| PoolError::AllocationFailed {
            requested,
            reason: e.to_string(),
        })?;

        let pinned = match self.policy {
            PinPolicy::Disabled => false,
            PinPolicy::Required => {
                lock_pages(&map).map_err(|reason| PoolError::PinFailed { requested, reason })?;
                true
            }
            PinPolicy::BestEffort => match lock_pages(&map) {
                Ok(()) => true,
                Err(reason) => {
                    warn!(requested, %reason, "page locking refused, using pageable memory");
                    false
                }
            },
        };

        debug!(requested, pinned, "host region mapped");
        Ok(PinnedRegion::new(map, layout, pinned))
    }
}

#[cfg(unix)]
fn lock_pages(map: &MmapMut) -> Result<(), String> {
    map.lock().map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn lock_pages(_map: &MmapMut) -> Result<(), String> {
    Err("page locking is not supported on this platform".into())
}
