//! The contiguous, optionally page-locked memory block behind a stream.

use crate::error::PoolError;
use crate::layout::BufferLayout;
use crossbeam_queue::SegQueue;
use memmap2::MmapMut;
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// One contiguous block of `buffer_count × buffer_size` bytes, indexed by slot.
///
/// Slots are handed out lock-free: the device claims a slot for every frame it
/// delivers, fills it through [`PinnedRegion::write_slot`] and returns it when
/// the frame is released.
pub struct PinnedRegion {
    map: RwLock<MmapMut>,
    len: usize,
    base: usize,
    layout: BufferLayout,
    pinned: bool,
    free_slots: SegQueue<usize>,
    in_flight: AtomicUsize,
    total_claims: AtomicU64,
}

impl PinnedRegion {
    pub(crate) fn new(map: MmapMut, layout: BufferLayout, pinned: bool) -> Self {
        let free_slots = SegQueue::new();
        for slot in 0..layout.buffer_count() {
            free_slots.push(slot);
        }
        Self {
            len: map.len(),
            base: map.as_ptr() as usize,
            map: RwLock::new(map),
            layout,
            pinned,
            free_slots,
            in_flight: AtomicUsize::new(0),
            total_claims: AtomicU64::new(0),
        }
    }

    /// Layout this region was allocated for.
    #[must_use]
    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// Whether the pages are locked in physical memory.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Length of the whole region in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// The region has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address, as handed to a transport layer.
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.base as *const u8
    }

    /// Read-only view of one slot. Writers to the region wait while it is held.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<MappedRwLockReadGuard<'_, [u8]>> {
        let range = self.slot_range(index)?;
        Some(RwLockReadGuard::map(self.map.read(), |map| &map[range]))
    }

    /// Mutable view of one slot; requires exclusive ownership of the region.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let range = self.slot_range(index)?;
        Some(&mut self.map.get_mut()[range])
    }

    /// Copy `data` to the start of slot `index` through a shared handle.
    ///
    /// This is how a device fills the slot it claimed for a frame. Returns the
    /// number of bytes written.
    pub fn write_slot(&self, index: usize, data: &[u8]) -> Result<usize, PoolError> {
        let range = self.slot_range(index).ok_or(PoolError::NoSuchSlot {
            slot: index,
            count: self.layout.buffer_count(),
        })?;
        if data.len() > range.len() {
            return Err(PoolError::SlotOverflow {
                slot: index,
                capacity: range.len(),
                len: data.len(),
            });
        }
        let start = range.start;
        self.map.write()[start..start + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn slot_range(&self, index: usize) -> Option<std::ops::Range<usize>> {
        if index >= self.layout.buffer_count() {
            return None;
        }
        let start = index * self.layout.buffer_size();
        Some(start..start + self.layout.buffer_size())
    }

    /// Take the oldest free slot, or `None` when every slot is in flight.
    pub fn claim_slot(&self) -> Option<usize> {
        let slot = self.free_slots.pop()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.total_claims.fetch_add(1, Ordering::Relaxed);
        Some(slot)
    }

    /// Give a slot back after its frame has been released.
    pub fn return_slot(&self, slot: usize) {
        debug_assert!(slot < self.layout.buffer_count());
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.free_slots.push(slot);
    }

    /// Slots currently held by delivered, unreleased frames.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Slots claimed since allocation.
    #[must_use]
    pub fn total_claims(&self) -> u64 {
        self.total_claims.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for PinnedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedRegion")
            .field("layout", &self.layout)
            .field("pinned", &self.pinned)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{BufferLayout, HostAllocator, PinnedAllocator, PoolError, TransportClass};
    use std::sync::Arc;

    #[test]
    fn slots_are_disjoint_and_sized() {
        let layout = BufferLayout::for_payload(100, 3, TransportClass::GigEVision).unwrap();
        let mut region = HostAllocator::unpinned().allocate(layout).unwrap();
        assert_eq!(region.len(), 300);

        region.slot_mut(1).unwrap().fill(7);
        assert!(region.slot(0).unwrap().iter().all(|&b| b == 0));
        assert!(region.slot(1).unwrap().iter().all(|&b| b == 7));
        assert!(region.slot(2).unwrap().iter().all(|&b| b == 0));
        assert!(region.slot(3).is_none());
    }

    #[test]
    fn slots_cycle_oldest_first() {
        let layout = BufferLayout::for_payload(16, 2, TransportClass::GigEVision).unwrap();
        let region = HostAllocator::unpinned().allocate(layout).unwrap();

        let a = region.claim_slot().unwrap();
        let b = region.claim_slot().unwrap();
        assert_eq!((a, b), (0, 1));
        assert!(region.claim_slot().is_none());
        assert_eq!(region.in_flight(), 2);

        region.return_slot(a);
        assert_eq!(region.claim_slot(), Some(0));
        region.return_slot(0);
        region.return_slot(b);
        assert_eq!(region.in_flight(), 0);
        assert_eq!(region.total_claims(), 3);
    }

    #[test]
    fn shared_handle_writes_into_claimed_slot() {
        let layout = BufferLayout::for_payload(8, 2, TransportClass::GigEVision).unwrap();
        let region = Arc::new(HostAllocator::unpinned().allocate(layout).unwrap());
        let device_side = Arc::clone(&region);

        let slot = device_side.claim_slot().unwrap();
        assert_eq!(device_side.write_slot(slot, &[1, 2, 3]).unwrap(), 3);
        assert_eq!(&region.slot(slot).unwrap()[..4], &[1, 2, 3, 0]);
        assert!(region.slot(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_or_unknown_slot_writes_are_refused() {
        let layout = BufferLayout::for_payload(4, 1, TransportClass::GigEVision).unwrap();
        let region = HostAllocator::unpinned().allocate(layout).unwrap();
        assert_eq!(
            region.write_slot(0, &[0; 5]),
            Err(PoolError::SlotOverflow {
                slot: 0,
                capacity: 4,
                len: 5
            })
        );
        assert_eq!(
            region.write_slot(1, &[0]),
            Err(PoolError::NoSuchSlot { slot: 1, count: 1 })
        );
    }
}
