//! The capability set shared by every allocator variant.
//!
//! [`Allocator`] is the raw allocate/deallocate pair, [`Resettable`] is the
//! whole-region clear, [`MemoryUsage`] reports the accounting counters, and
//! [`TypedAllocExt`] layers typed construct/destruct helpers over any
//! implementor — written once, generic over the variant, so the four
//! disciplines stay interchangeable at the call site (directly, through
//! generics, or behind `&dyn Allocator`).

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use super::AllocResult;

/// Raw region allocation interface.
///
/// # Safety Requirements
///
/// Implementors must ensure that:
/// - Returned pointers are aligned to `layout.align()` and valid for
///   reads and writes of `layout.size()` bytes inside the backing buffer
/// - A failed `allocate` leaves the allocator observably unchanged apart
///   from the failed-allocation counter
/// - `deallocate` only ever receives pointers previously returned by the
///   same allocator instance; double-free is undefined behavior
pub unsafe trait Allocator {
    /// Allocates memory for the given layout.
    ///
    /// # Errors
    /// Returns [`OutOfRegion`](super::OutOfRegion) when no free span can
    /// hold the request.
    ///
    /// # Panics
    /// A zero-size layout is a contract violation and panics.
    ///
    /// # Safety
    /// The returned memory is uninitialized and must be written before it
    /// is read. The pointer must not outlive the allocator.
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Releases the span previously returned by [`allocate`](Self::allocate).
    ///
    /// No layout is needed: disciplines that require per-allocation
    /// bookkeeping recover it from the header written in front of the user
    /// pointer.
    ///
    /// # Safety
    /// - `ptr` must have been returned by this allocator and not freed since
    /// - After this call `ptr` is invalid and must not be used
    unsafe fn deallocate(&self, ptr: NonNull<u8>);
}

/// Whole-region clear.
///
/// Returns the allocator to its post-construction state with no live
/// allocations; `used` and peak accounting drop to zero. Idempotent.
pub trait Resettable {
    /// Resets the allocator, invalidating all previous allocations.
    ///
    /// # Safety
    /// Every pointer handed out before the call becomes invalid the moment
    /// it returns; the caller must ensure none are used afterwards.
    unsafe fn reset(&self);
}

/// Memory usage reporting trait
pub trait MemoryUsage {
    /// Returns current allocated memory in bytes
    fn used_memory(&self) -> usize;

    /// Returns memory still available for allocation in bytes
    fn available_memory(&self) -> Option<usize>;

    /// Returns total memory capacity in bytes
    fn total_memory(&self) -> Option<usize> {
        match (self.used_memory(), self.available_memory()) {
            (used, Some(available)) => Some(used + available),
            _ => None,
        }
    }
}

/// Typed construct/destruct helpers over any [`Allocator`].
///
/// The region hands out raw bytes; these helpers pair the allocation with
/// in-place construction and the deallocation with `drop_in_place`, which
/// is as far as the crate goes toward typed memory — there is no tracking
/// of what lives where.
pub trait TypedAllocExt: Allocator {
    /// Allocates storage for a `T` and moves `value` into it.
    ///
    /// # Panics
    /// Zero-sized `T` is a contract violation (the region never hands out
    /// zero bytes).
    ///
    /// # Safety
    /// The caller owns the value until [`drop_one`](Self::drop_one); it is
    /// leaked (not dropped) if never passed back.
    #[inline]
    unsafe fn alloc_init<T>(&self, value: T) -> AllocResult<NonNull<T>> {
        let layout = Layout::new::<T>();
        let ptr = unsafe { self.allocate(layout)? };
        let typed = ptr.cast::<T>();
        unsafe { typed.as_ptr().write(value) };
        Ok(typed)
    }

    /// Allocates an array of `n` elements and default-constructs each.
    ///
    /// Returns the array base pointer.
    ///
    /// # Panics
    /// `n == 0` and zero-sized `T` are contract violations.
    ///
    /// # Safety
    /// Elements must be released with [`drop_array`](Self::drop_array)
    /// using the same `n`.
    #[inline]
    unsafe fn alloc_array_default<T: Default>(&self, n: usize) -> AllocResult<NonNull<[T]>> {
        assert!(n > 0, "array length must be non-zero");

        let layout = Layout::array::<T>(n).expect("array layout overflows");
        let ptr = unsafe { self.allocate(layout)? };
        let base = ptr.cast::<T>();
        for i in 0..n {
            unsafe { base.as_ptr().add(i).write(T::default()) };
        }
        Ok(NonNull::slice_from_raw_parts(base, n))
    }

    /// Drops the value in place and releases its storage.
    ///
    /// # Safety
    /// - `ptr` must come from [`alloc_init`](Self::alloc_init) on this
    ///   allocator and hold a live `T`
    /// - Double-free is undefined behavior
    #[inline]
    unsafe fn drop_one<T>(&self, ptr: NonNull<T>) {
        unsafe {
            ptr::drop_in_place(ptr.as_ptr());
            self.deallocate(ptr.cast());
        }
    }

    /// Drops `n` elements in place and releases the array storage.
    ///
    /// # Panics
    /// `n == 0` is a contract violation.
    ///
    /// # Safety
    /// - `ptr`/`n` must match an earlier
    ///   [`alloc_array_default`](Self::alloc_array_default) call exactly
    /// - All `n` elements must still be live
    #[inline]
    unsafe fn drop_array<T>(&self, ptr: NonNull<T>, n: usize) {
        assert!(n > 0, "array length must be non-zero");

        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(ptr.as_ptr(), n));
            self.deallocate(ptr.cast());
        }
    }
}

// Every allocator gets the typed helpers.
impl<A: Allocator + ?Sized> TypedAllocExt for A {}

// ============================================================================
// Blanket implementations for references
// ============================================================================

// SAFETY: forwards to the referenced allocator unchanged.
unsafe impl<T: Allocator + ?Sized> Allocator for &T {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        unsafe { (**self).allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        unsafe { (**self).deallocate(ptr) }
    }
}

impl<T: MemoryUsage + ?Sized> MemoryUsage for &T {
    fn used_memory(&self) -> usize {
        (**self).used_memory()
    }

    fn available_memory(&self) -> Option<usize> {
        (**self).available_memory()
    }

    fn total_memory(&self) -> Option<usize> {
        (**self).total_memory()
    }
}

impl<T: Resettable + ?Sized> Resettable for &T {
    unsafe fn reset(&self) {
        unsafe { (**self).reset() }
    }
}
