//! Stack allocator: a monotone bump pointer with rewind-on-free.
//!
//! # Memory Layout
//! ```text
//! [base]----[alloc1]----[alloc2]----[alloc3]----[top]----[free]----[end]
//!            <------- allocated ------->        <---- available ---->
//! ```
//!
//! Allocation advances `top`; freeing a live pointer rewinds `top` to it,
//! releasing that allocation *and everything above it* in one step. Callers
//! that free in reverse order get a LIFO discipline; callers that free an
//! older pointer get bulk truncation back to that point. Freeing at or
//! above `top` is ignored, which keeps the rewind-to-marker usage safe to
//! repeat.

use core::alloc::Layout;
use core::ptr::NonNull;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use super::region::Region;
use super::{
    AllocResult, Allocator, AllocatorStats, MemoryUsage, OutOfRegion, Resettable,
    StatisticsProvider,
};
use crate::utils::align_adjustment;

/// Bump allocator over one owned region.
pub struct StackAllocator {
    region: Region,

    /// First byte above the live allocations; `base <= top <= end`
    top: core::cell::Cell<usize>,
}

impl StackAllocator {
    /// Reserves `capacity` bytes and places `top` at the base.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        let region = Region::new(capacity);
        let top = core::cell::Cell::new(region.start());

        #[cfg(feature = "logging")]
        debug!(capacity, "stack allocator constructed");

        Self { region, top }
    }

    /// Total capacity of the region in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Bytes between the base and `top`.
    #[inline]
    pub fn used(&self) -> usize {
        self.top.get() - self.region.start()
    }

    /// Bytes between `top` and the end of the region.
    #[inline]
    pub fn available(&self) -> usize {
        self.region.end() - self.top.get()
    }

    /// Highest `used` value since construction or the last reset.
    #[inline]
    pub fn peak_used(&self) -> usize {
        self.region.peak_used()
    }
}

// SAFETY: every returned pointer is carved out of the owned region between
// `base` and `end`, aligned by `align_adjustment`, and `top` only moves
// past span boundaries the caller has been handed.
unsafe impl Allocator for StackAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        assert!(layout.size() > 0, "zero-size allocation is a contract violation");

        let top = self.top.get();
        let adjustment = align_adjustment(top, layout.align());
        let aligned = top + adjustment;

        match aligned.checked_add(layout.size()) {
            Some(new_top) if new_top <= self.region.end() => {
                self.top.set(new_top);
                self.region.set_used(new_top - self.region.start());
                self.region.record_alloc();

                // SAFETY: aligned is inside the region and non-null.
                let ptr = unsafe { NonNull::new_unchecked(self.region.ptr_at(aligned)) };
                Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
            }
            _ => {
                self.region.record_failed();
                Err(OutOfRegion::for_layout(layout))
            }
        }
    }

    /// Rewinds `top` to `ptr`, freeing it and everything allocated after it.
    ///
    /// A pointer at or above `top` is ignored rather than treated as an
    /// error, so a caller can replay a saved marker without tracking
    /// whether it is still live.
    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        debug_assert!(self.region.contains(addr));

        if addr >= self.top.get() {
            return;
        }

        self.top.set(addr);
        self.region.set_used(addr - self.region.start());
        self.region.record_dealloc();
    }
}

impl Resettable for StackAllocator {
    unsafe fn reset(&self) {
        self.top.set(self.region.start());
        self.region.reset_accounting();

        #[cfg(feature = "logging")]
        trace!("stack allocator reset");
    }
}

impl MemoryUsage for StackAllocator {
    fn used_memory(&self) -> usize {
        self.used()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.available())
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

impl StatisticsProvider for StackAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.region.statistics()
    }

    fn reset_statistics(&self) {
        self.region.reset_statistics();
    }
}
