//! Integration tests for the free-list allocator

use std::alloc::Layout;

use carve_memory::allocator::{
    Allocator, FreeListAllocator, MemoryUsage, Resettable, StatisticsProvider,
};

#[test]
fn coalescing_collapses_neighbors_step_by_step() {
    // Three small allocations, then free middle / left / right and watch
    // the list fold back into a single whole-buffer span.
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        let layout = Layout::from_size_align(16, 1).unwrap();
        let a = allocator.allocate(layout).unwrap();
        let b = allocator.allocate(layout).unwrap();
        let c = allocator.allocate(layout).unwrap();
        assert_eq!(allocator.free_span_count(), 1); // the tail

        allocator.deallocate(b.cast());
        assert_eq!(allocator.free_span_count(), 2);

        // a's span is adjacent to b's freed span: they merge.
        allocator.deallocate(a.cast());
        assert_eq!(allocator.free_span_count(), 2);

        // c sits between the merged span and the tail: everything merges.
        allocator.deallocate(c.cast());
        assert_eq!(allocator.free_span_count(), 1);
        assert_eq!(allocator.largest_free_span(), 1024);
        assert_eq!(allocator.used(), 0);
    }
}

#[test]
fn first_fit_prefers_the_lowest_address() {
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        let layout = Layout::from_size_align(100, 1).unwrap();
        let a = allocator.allocate(layout).unwrap();
        let a_addr = a.cast::<u8>().as_ptr() as usize;
        let _b = allocator.allocate(layout).unwrap();
        let _c = allocator.allocate(layout).unwrap();

        allocator.deallocate(a.cast());

        // The freed low span and the tail both fit; first fit takes the low
        // one, and the reused address matches the original.
        let again = allocator
            .allocate(Layout::from_size_align(50, 1).unwrap())
            .unwrap();
        assert_eq!(again.cast::<u8>().as_ptr() as usize, a_addr);
    }
}

#[test]
fn pointers_honor_requested_alignment() {
    let allocator = FreeListAllocator::new(2048);

    unsafe {
        for align in [1usize, 8, 16, 64, 128] {
            let layout = Layout::from_size_align(50, align).unwrap();
            let ptr = allocator.allocate(layout).unwrap();
            assert_eq!(
                ptr.cast::<u8>().as_ptr() as usize % align,
                0,
                "alignment {align} violated"
            );
        }
    }
}

#[test]
fn tiny_requests_round_up_to_a_trackable_span() {
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        // One byte still reserves header + minimum payload, and the span
        // can host a free node again after release.
        let p = allocator
            .allocate(Layout::from_size_align(1, 1).unwrap())
            .unwrap();
        assert_eq!(allocator.used(), 24);

        allocator.deallocate(p.cast());
        assert_eq!(allocator.used(), 0);
        assert_eq!(allocator.free_span_count(), 1);
    }
}

#[test]
fn exact_fit_empties_the_region() {
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        // Largest possible request: whole buffer minus the header.
        let p = allocator
            .allocate(Layout::from_size_align(1008, 1).unwrap())
            .unwrap();
        assert_eq!(allocator.used(), 1024);
        assert_eq!(allocator.free_span_count(), 0);

        assert!(allocator
            .allocate(Layout::from_size_align(1, 1).unwrap())
            .is_err());

        allocator.deallocate(p.cast());
        assert_eq!(allocator.used(), 0);
        assert_eq!(allocator.largest_free_span(), 1024);
    }
}

#[test]
fn a_sliver_remainder_is_absorbed_not_leaked() {
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        // 1000 + header leaves an 8-byte tail, too small for a free node;
        // the allocation absorbs it instead of leaving an untrackable gap.
        let p = allocator
            .allocate(Layout::from_size_align(1000, 1).unwrap())
            .unwrap();
        assert_eq!(allocator.used(), 1024);
        assert_eq!(allocator.free_span_count(), 0);

        allocator.deallocate(p.cast());
        assert_eq!(allocator.used(), 0);
        assert_eq!(allocator.free_span_count(), 1);
    }
}

#[test]
fn out_of_region_then_recovery_by_freeing() {
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        let layout = Layout::from_size_align(256, 1).unwrap();

        let mut live = Vec::new();
        loop {
            match allocator.allocate(layout) {
                Ok(ptr) => live.push(ptr),
                Err(err) => {
                    assert_eq!(err.size, 256);
                    break;
                }
            }
        }
        assert_eq!(live.len(), 3);

        allocator.deallocate(live.pop().unwrap().cast());
        assert!(allocator.allocate(layout).is_ok());
    }
}

#[test]
fn round_trip_frees_in_any_order_restore_the_region() {
    let allocator = FreeListAllocator::new(4096);

    unsafe {
        let layout = Layout::from_size_align(100, 8).unwrap();
        let live: Vec<_> = (0..8).map(|_| allocator.allocate(layout).unwrap()).collect();

        for i in [5usize, 0, 7, 2, 6, 1, 4, 3] {
            allocator.deallocate(live[i].cast());
        }
    }

    assert_eq!(allocator.used(), 0);
    assert_eq!(allocator.free_span_count(), 1);
    assert_eq!(allocator.largest_free_span(), 4096);
}

#[test]
fn reset_is_idempotent_and_restores_one_span() {
    let allocator = FreeListAllocator::new(1024);

    unsafe {
        let layout = Layout::from_size_align(64, 8).unwrap();
        let _a = allocator.allocate(layout).unwrap();
        let _b = allocator.allocate(layout).unwrap();

        allocator.reset();
        allocator.reset();
    }

    assert_eq!(allocator.used_memory(), 0);
    assert_eq!(allocator.peak_used(), 0);
    assert_eq!(allocator.free_span_count(), 1);
    assert_eq!(allocator.largest_free_span(), 1024);
}

#[test]
fn statistics_count_failures_without_state_changes() {
    let allocator = FreeListAllocator::new(256);

    unsafe {
        let used_before = allocator.used();
        assert!(allocator
            .allocate(Layout::from_size_align(512, 1).unwrap())
            .is_err());
        assert_eq!(allocator.used(), used_before);
    }

    let stats = allocator.statistics();
    assert_eq!(stats.failed_allocations, 1);
    assert_eq!(stats.allocation_count, 0);
}

#[test]
fn used_stays_below_peak_stays_below_capacity() {
    let allocator = FreeListAllocator::new(2048);

    unsafe {
        let layout = Layout::from_size_align(200, 8).unwrap();
        let a = allocator.allocate(layout).unwrap();
        let b = allocator.allocate(layout).unwrap();
        let peak = allocator.peak_used();
        allocator.deallocate(a.cast());
        allocator.deallocate(b.cast());

        assert!(allocator.used() <= allocator.peak_used());
        assert_eq!(allocator.peak_used(), peak);
        assert!(allocator.peak_used() <= allocator.capacity());
    }
}
