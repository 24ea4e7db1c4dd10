//! Free-list allocator: an address-ordered intrusive list of free spans
//! with first-fit placement and in-place coalescing.
//!
//! # Memory Layout
//! ```text
//! [free span]──[adj][header][payload]──[free span]──[adj][header][payload]
//!      │                                    ▲ next
//!      └────────────────────────────────────┘
//! ```
//!
//! Each free span starts with a [`FreeNode`] carrying its size and a link
//! to the next free span; the list is sorted by ascending address so a
//! single walk on free finds both coalescing neighbors. Each live span is
//! fronted by an [`AllocHeader`] recording the payload size and the
//! alignment padding, which is everything `deallocate` needs to rebuild
//! the span. A byte range is either a live allocation or free-structure
//! storage, never both: node bytes are reused for the header the moment a
//! span is handed out, and vice versa.
//!
//! ## Invariants
//!
//! - Node addresses strictly increase along `next`
//! - No two adjacent free spans share a boundary (full coalescing)
//! - Every span boundary is aligned to [`SPAN_ALIGN`], so node and header
//!   placement is always well-aligned
//! - `used_memory() == capacity − Σ free span sizes`

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
use crate::utils::{align_adjustment, align_up};

/// Intrusive record at the start of each free span.
#[repr(C)]
struct FreeNode {
    /// Length of the free span in bytes, this node included
    size: usize,
    /// Cached copy of the span's own start address; the list walk reads
    /// addresses monotonically without chasing `self` pointers
    address: usize,
    next: *mut FreeNode,
}

/// Bookkeeping record immediately preceding every live user span.
#[repr(C)]
struct AllocHeader {
    /// Bytes reserved for the user, padding included
    payload_size: usize,
    /// Alignment padding between the span start and this header
    adjustment: usize,
}

const NODE_SIZE: usize = size_of::<FreeNode>();
const HEADER_SIZE: usize = size_of::<AllocHeader>();

/// Smallest payload a live span may carry: when freed, the span must be
/// able to host a [`FreeNode`] again.
const MIN_PAYLOAD: usize = NODE_SIZE - HEADER_SIZE;

/// Every span boundary stays a multiple of this, so in-place node and
/// header construction is always aligned. Payload sizes are rounded up
/// accordingly.
const SPAN_ALIGN: usize = align_of::<FreeNode>();

/// First-fit free-list allocator over one owned region.
pub struct FreeListAllocator {
    region: Region,

    /// Lowest-addressed free span; null when the region is fully reserved
    head: Cell<*mut FreeNode>,
}

impl FreeListAllocator {
    /// Reserves `capacity` bytes and covers them with a single free span.
    ///
    /// # Panics
    /// Panics if `capacity` cannot hold one free node.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= NODE_SIZE,
            "region must hold at least one free node"
        );

        let allocator = Self {
            region: Region::new(capacity),
            head: Cell::new(ptr::null_mut()),
        };
        let head = allocator.node_at(allocator.region.start(), capacity, ptr::null_mut());
        allocator.head.set(head);

        #[cfg(feature = "logging")]
        debug!(capacity, "free-list allocator constructed");

        allocator
    }

    /// Total capacity of the region in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Bytes currently reserved, headers and padding included.
    #[inline]
    pub fn used(&self) -> usize {
        self.region.used()
    }

    /// Highest `used` value since construction or the last reset.
    #[inline]
    pub fn peak_used(&self) -> usize {
        self.region.peak_used()
    }

    /// Number of spans on the free list.
    pub fn free_span_count(&self) -> usize {
        let mut count = 0;
        let mut curr = self.head.get();
        while !curr.is_null() {
            count += 1;
            // SAFETY: list links only ever point at live FreeNodes.
            curr = unsafe { (*curr).next };
        }
        count
    }

    /// Size of the largest span on the free list.
    pub fn largest_free_span(&self) -> usize {
        let mut largest = 0;
        let mut curr = self.head.get();
        while !curr.is_null() {
            // SAFETY: list links only ever point at live FreeNodes.
            unsafe {
                largest = largest.max((*curr).size);
                curr = (*curr).next;
            }
        }
        largest
    }

    /// Constructs a free node in place at `addr`.
    fn node_at(&self, addr: usize, size: usize, next: *mut FreeNode) -> *mut FreeNode {
        let node = self.region.ptr_at(addr).cast::<FreeNode>();
        debug_assert!(addr % SPAN_ALIGN == 0);
        debug_assert!(size >= NODE_SIZE);
        // SAFETY: addr is a span boundary inside the buffer with at least
        // NODE_SIZE bytes before the next span; the bytes belong to no live
        // allocation.
        unsafe { node.write(FreeNode { size, address: addr, next }) };
        node
    }
}

// SAFETY: pointers are carved out of free spans of the owned region; the
// header written in front of each one records exactly the span taken, and
// deallocate returns that span to the list before anything reuses it.
unsafe impl Allocator for FreeListAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        assert!(layout.size() > 0, "zero-size allocation is a contract violation");

        // Pad so the span can host a free node when released, and so the
        // next span boundary stays aligned for node placement.
        let mut payload = align_up(layout.size().max(MIN_PAYLOAD), SPAN_ALIGN);
        let required = payload + HEADER_SIZE + layout.align() - 1;

        // First fit: walk until a span is large enough for the worst-case
        // adjustment.
        let mut prev: *mut FreeNode = ptr::null_mut();
        let mut curr = self.head.get();
        // SAFETY: list links only ever point at live FreeNodes.
        while !curr.is_null() && unsafe { (*curr).size } < required {
            prev = curr;
            curr = unsafe { (*curr).next };
        }

        if curr.is_null() {
            self.region.record_failed();
            return Err(OutOfRegion::for_layout(layout));
        }

        // SAFETY: curr is a live node found by the walk above.
        let (span_addr, span_size, span_next) =
            unsafe { ((*curr).address, (*curr).size, (*curr).next) };

        let adjustment = align_adjustment(span_addr + HEADER_SIZE, layout.align());
        let user = span_addr + adjustment + HEADER_SIZE;

        // Carve a node from the tail when it can still be tracked;
        // otherwise the sliver is absorbed into the allocation.
        let remainder = span_addr + span_size - (user + payload);
        let replacement = if remainder >= NODE_SIZE {
            self.node_at(user + payload, remainder, span_next)
        } else {
            payload += remainder;
            span_next
        };

        if prev.is_null() {
            self.head.set(replacement);
        } else {
            // SAFETY: prev is a live node preceding curr.
            unsafe { (*prev).next = replacement };
        }

        let header = self.region.ptr_at(user - HEADER_SIZE).cast::<AllocHeader>();
        // SAFETY: the header slot lies inside the span just taken off the
        // list; user - HEADER_SIZE is SPAN_ALIGN-aligned.
        unsafe { header.write(AllocHeader { payload_size: payload, adjustment }) };

        self.region.add_used(adjustment + HEADER_SIZE + payload);
        self.region.record_alloc();

        // SAFETY: user is inside the buffer and non-null.
        let ptr = unsafe { NonNull::new_unchecked(self.region.ptr_at(user)) };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let user = ptr.as_ptr() as usize;
        debug_assert!(self.region.contains(user));

        // SAFETY: allocate wrote this header right in front of the user
        // pointer; the span geometry is reconstructed from it.
        let header = unsafe {
            self.region
                .ptr_at(user - HEADER_SIZE)
                .cast::<AllocHeader>()
                .read()
        };
        let mut span_start = user - header.adjustment - HEADER_SIZE;
        let mut span_len = header.adjustment + HEADER_SIZE + header.payload_size;

        self.region.sub_used(span_len);
        self.region.record_dealloc();

        // One address-ordered walk finds both neighbors: prev is the last
        // node below the span, next the first at or above its end.
        let mut prev: *mut FreeNode = ptr::null_mut();
        let mut next = self.head.get();
        // SAFETY: list links only ever point at live FreeNodes.
        while !next.is_null() && unsafe { (*next).address } < span_start {
            prev = next;
            next = unsafe { (*next).next };
        }

        // SAFETY: prev/next are live nodes (or null) from the walk above.
        unsafe {
            if !prev.is_null() && (*prev).address + (*prev).size == span_start {
                span_start = (*prev).address;
                span_len += (*prev).size;
            }

            let mut link = next;
            if !next.is_null() && (*next).address == span_start + span_len {
                span_len += (*next).size;
                link = (*next).next;
            }

            // May overwrite prev when the spans merged; prev's bytes become
            // the merged node, so the old links stay consistent.
            let node = self.node_at(span_start, span_len, link);
            if prev.is_null() {
                self.head.set(node);
            } else if prev != node {
                (*prev).next = node;
            }
        }
    }
}

impl Resettable for FreeListAllocator {
    unsafe fn reset(&self) {
        let head = self.node_at(self.region.start(), self.region.capacity(), ptr::null_mut());
        self.head.set(head);
        self.region.reset_accounting();

        #[cfg(feature = "logging")]
        trace!("free-list allocator reset");
    }
}

impl MemoryUsage for FreeListAllocator {
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

impl StatisticsProvider for FreeListAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.region.statistics()
    }

    fn reset_statistics(&self) {
        self.region.reset_statistics();
    }
}

// SAFETY: the list pointers all target the exclusively owned buffer; moving
// the allocator moves the buffer and the list together. Cell fields keep
// the type !Sync.
unsafe impl Send for FreeListAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_and_header_geometry() {
        // The minimum-payload rule depends on the node outsizing the header.
        assert!(NODE_SIZE > HEADER_SIZE);
        assert_eq!(MIN_PAYLOAD % SPAN_ALIGN, 0);
        assert_eq!(HEADER_SIZE % SPAN_ALIGN, 0);
    }

    #[test]
    fn list_walk_observers() {
        let allocator = FreeListAllocator::new(1024);
        assert_eq!(allocator.free_span_count(), 1);
        assert_eq!(allocator.largest_free_span(), 1024);

        unsafe {
            let layout = Layout::from_size_align(100, 1).unwrap();
            let a = allocator.allocate(layout).unwrap();
            let b = allocator.allocate(layout).unwrap();
            assert_eq!(allocator.free_span_count(), 1);

            allocator.deallocate(a.cast());
            assert_eq!(allocator.free_span_count(), 2);

            allocator.deallocate(b.cast());
            assert_eq!(allocator.free_span_count(), 1);
            assert_eq!(allocator.largest_free_span(), 1024);
            assert_eq!(allocator.used(), 0);
        }
    }
}
