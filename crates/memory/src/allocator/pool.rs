//! Pool allocator: equal fixed-size slots on an intrusive free stack.
//!
//! # Memory Layout
//! ```text
//! [slot0][slot1][slot2][slot3]...[slotN]
//!    ↓      ↓      ↓      ↓         ↓
//! [free] → [free] → [used] [free] → null
//! ```
//!
//! The buffer is split into `capacity / slot_size` slots. Each free slot
//! stores a pointer to the next free slot in its first bytes; the slots
//! form a LIFO stack threaded through the buffer. Construction and reset
//! thread the stack from the highest address down so allocations proceed
//! from low addresses first. No coalescing, no headers, no per-slot
//! validation on free.

use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::{self, NonNull};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use super::region::Region;
use super::{
    AllocResult, Allocator, AllocatorStats, MemoryUsage, OutOfRegion, Resettable,
    StatisticsProvider,
};

/// Intrusive free-stack link living in the first bytes of each free slot.
#[repr(C)]
struct PoolNode {
    next: *mut PoolNode,
}

/// Fixed-slot allocator over one owned region.
pub struct PoolAllocator {
    region: Region,

    /// Size of every slot in bytes
    slot_size: usize,

    /// Number of slots in the region
    slot_count: usize,

    /// Top of the free stack; null when the pool is exhausted
    head: Cell<*mut PoolNode>,
}

impl PoolAllocator {
    /// Reserves `capacity` bytes and threads them into `capacity /
    /// slot_size` free slots.
    ///
    /// # Panics
    /// Panics if `capacity` is zero, if `slot_size` cannot hold the free
    /// stack link, or if `slot_size` does not divide `capacity`.
    pub fn new(capacity: usize, slot_size: usize) -> Self {
        assert!(
            slot_size >= size_of::<PoolNode>(),
            "slot size must hold a free stack link"
        );
        assert!(
            slot_size % align_of::<PoolNode>() == 0,
            "slot size must keep the free stack links aligned"
        );
        assert!(
            capacity % slot_size == 0,
            "slot size must divide the region capacity"
        );

        let allocator = Self {
            region: Region::new(capacity),
            slot_size,
            slot_count: capacity / slot_size,
            head: Cell::new(ptr::null_mut()),
        };
        allocator.thread_free_stack();

        #[cfg(feature = "logging")]
        debug!(
            capacity,
            slot_size,
            slot_count = allocator.slot_count,
            "pool allocator constructed"
        );

        allocator
    }

    /// Size of each slot in bytes.
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots in the pool.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Total capacity of the region in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Bytes held by live slots (`slot_size` × live slot count).
    #[inline]
    pub fn used(&self) -> usize {
        self.region.used()
    }

    /// Number of slots currently free.
    #[inline]
    pub fn free_slots(&self) -> usize {
        (self.capacity() - self.used()) / self.slot_size
    }

    /// Highest `used` value since construction or the last reset.
    #[inline]
    pub fn peak_used(&self) -> usize {
        self.region.peak_used()
    }

    /// Threads every slot onto the free stack, highest address first.
    fn thread_free_stack(&self) {
        let mut head: *mut PoolNode = ptr::null_mut();
        let mut addr = self.region.end();
        for _ in 0..self.slot_count {
            addr -= self.slot_size;
            let node = self.region.ptr_at(addr).cast::<PoolNode>();
            // SAFETY: addr is a slot boundary inside the buffer; slot_size
            // holds at least one aligned PoolNode (asserted in new()).
            unsafe { node.write(PoolNode { next: head }) };
            head = node;
        }
        self.head.set(head);
    }
}

// SAFETY: every returned pointer is a slot boundary inside the owned
// region; a slot leaves the free stack the moment it is handed out and
// rejoins it only through deallocate.
unsafe impl Allocator for PoolAllocator {
    /// # Panics
    /// `layout.size() > slot_size` and alignments that `slot_size` is not a
    /// multiple of are contract violations.
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        assert!(layout.size() > 0, "zero-size allocation is a contract violation");
        assert!(
            layout.size() <= self.slot_size,
            "request exceeds the pool slot size"
        );
        assert!(
            self.slot_size % layout.align() == 0 && layout.align() <= Region::BASE_ALIGN,
            "slot size must be a multiple of the requested alignment"
        );

        let head = self.head.get();
        if head.is_null() {
            self.region.record_failed();
            return Err(OutOfRegion::for_layout(layout));
        }

        // SAFETY: head is a live free slot; its link was written by
        // thread_free_stack or deallocate.
        self.head.set(unsafe { (*head).next });
        self.region.add_used(self.slot_size);
        self.region.record_alloc();

        // SAFETY: slots are never null.
        let ptr = unsafe { NonNull::new_unchecked(head.cast::<u8>()) };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    /// Pushes the slot back as the new stack top. The next allocation
    /// returns this address again (LIFO).
    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        debug_assert!(self.region.contains(ptr.as_ptr() as usize));

        let node = ptr.as_ptr().cast::<PoolNode>();
        // SAFETY: ptr was returned by allocate, so it is a slot boundary
        // with room for the link.
        unsafe { node.write(PoolNode { next: self.head.get() }) };
        self.head.set(node);
        self.region.sub_used(self.slot_size);
        self.region.record_dealloc();
    }
}

impl Resettable for PoolAllocator {
    /// Rebuilds the per-slot free stack exactly as construction did.
    unsafe fn reset(&self) {
        self.thread_free_stack();
        self.region.reset_accounting();

        #[cfg(feature = "logging")]
        trace!("pool allocator reset");
    }
}

impl MemoryUsage for PoolAllocator {
    fn used_memory(&self) -> usize {
        self.used()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity() - self.used())
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }
}

impl StatisticsProvider for PoolAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.region.statistics()
    }

    fn reset_statistics(&self) {
        self.region.reset_statistics();
    }
}

// SAFETY: the free-stack pointers all target the exclusively owned buffer;
// moving the allocator moves the buffer and the stack together. Cell fields
// keep the type !Sync.
unsafe impl Send for PoolAllocator {}
