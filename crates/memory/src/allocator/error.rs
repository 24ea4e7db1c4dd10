//! The one recoverable allocation error.
//!
//! Everything else an allocator can object to — zero-size requests, pool
//! slot-size mismatches, geometry that cannot hold a free node — is a
//! contract violation and panics at the call site instead of surfacing
//! here. Callers that receive [`OutOfRegion`] commonly free other
//! allocations and retry; the allocator's internal structures are untouched
//! by the failed call.

use core::alloc::Layout;

use thiserror::Error;

/// No free span in the region satisfies the request.
///
/// Carries the size and alignment that could not be placed so the caller
/// can decide what to release before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("out of region: no free span fits {size} bytes with alignment {align}")]
pub struct OutOfRegion {
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment in bytes.
    pub align: usize,
}

impl OutOfRegion {
    pub(crate) fn for_layout(layout: Layout) -> Self {
        Self { size: layout.size(), align: layout.align() }
    }
}

/// Result type for allocation operations
pub type AllocResult<T> = Result<T, OutOfRegion>;
