//! # Carve Memory
//!
//! Region-based memory allocators for latency-sensitive code paths.
//!
//! Each allocator in this crate reserves one contiguous byte buffer from the
//! host allocator at construction and hands out aligned sub-regions of it on
//! demand. Four disciplines are provided behind one uniform interface, so
//! call sites can trade space for time without changing shape:
//!
//! - [`StackAllocator`] — monotone bump pointer, frees by rewinding
//! - [`PoolAllocator`] — equal fixed-size slots on an intrusive free stack
//! - [`FreeListAllocator`] — address-ordered free list, first-fit, coalescing
//! - [`FreeTreeAllocator`] — address-keyed free tree augmented with
//!   subtree-max sizes for pruned fit search and O(height) coalescing
//!
//! All allocators are single-threaded by design: they use interior
//! mutability through [`core::cell::Cell`] and are `Send` but not `Sync`.
//! Wrap one in a lock if it must be shared.
//!
//! ```
//! use std::alloc::Layout;
//! use carve_memory::allocator::{Allocator, FreeTreeAllocator};
//!
//! let allocator = FreeTreeAllocator::new(4096);
//! unsafe {
//!     let layout = Layout::from_size_align(256, 16).unwrap();
//!     let ptr = allocator.allocate(layout).unwrap();
//!     assert_eq!(ptr.cast::<u8>().as_ptr() as usize % 16, 0);
//!     allocator.deallocate(ptr.cast());
//! }
//! ```
#![allow(unsafe_code)]

pub mod allocator;
pub mod utils;

pub use allocator::{
    AllocResult, Allocator, AllocatorStats, FreeListAllocator, FreeTreeAllocator, MemoryUsage,
    OutOfRegion, PoolAllocator, Resettable, StackAllocator, StatisticsProvider, TypedAllocExt,
};
