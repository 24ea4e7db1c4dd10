//! The allocator family: one region, four disciplines.
//!
//! Every allocator here owns a single contiguous byte region and carves
//! aligned sub-regions out of it on demand. They share the capability set
//! in [`traits`] — allocate, deallocate, reset, usage reporting and the
//! typed construct/destruct helpers — so call sites pick a discipline for
//! its space/time trade-off, not for its API.

mod error;
mod free_list;
mod free_tree;
mod pool;
mod region;
mod stack;
mod stats;
mod traits;

pub use error::{AllocResult, OutOfRegion};
pub use free_list::FreeListAllocator;
pub use free_tree::FreeTreeAllocator;
pub use pool::PoolAllocator;
pub use stack::StackAllocator;
pub use stats::{AllocatorStats, StatisticsProvider};
pub use traits::{Allocator, MemoryUsage, Resettable, TypedAllocExt};
