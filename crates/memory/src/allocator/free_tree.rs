//! Free-tree allocator: an intrusive binary search tree over free spans,
//! keyed by span start address and augmented with subtree-max sizes.
//!
//! Every free span begins with a [`TreeNode`] holding the span size, the
//! largest size anywhere in its subtree, a parent back-pointer and two
//! child pointers — five words that live inside the managed memory itself.
//! The subtree-max field prunes the fit search: a whole subtree is skipped
//! the moment its maximum cannot hold the request, and coalescing
//! neighbors are found by walking the would-be insertion path instead of
//! scanning spans in address order.
//!
//! The fit rule is a directed descent, not strict best-fit: the search
//! takes the lowest-addressed span that can hold the request, descending
//! left whenever the left subtree's maximum still fits. Address-ordered
//! placement keeps the layout stable and coalescing local, at the cost of
//! occasionally choosing a larger span than the globally smallest fit —
//! all in one root-to-node walk.
//!
//! The tree is deliberately unbalanced; every operation is O(height) and
//! height can degenerate to O(n) under adversarial address patterns.
//! Rebalancing (red-black or AVL) is a possible future extension.
//!
//! ## Invariants
//!
//! - In-order traversal visits nodes in ascending address order
//! - `max_size(n) = max(n.size, max_size(n.left), max_size(n.right))`,
//!   missing children contributing zero
//! - `child.parent` points back at the node holding the child link
//! - No two adjacent free spans share a boundary (full coalescing)
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
///
/// Ownership conceptually follows the tree downward; `parent` is a
/// non-owning back-reference used for upward `max_size` propagation and
/// for re-linking during removal. All nodes share the buffer's lifetime.
#[repr(C)]
struct TreeNode {
    /// Length of the free span in bytes, this node included
    size: usize,
    /// Largest `size` in the subtree rooted here; never below `size`
    max_size: usize,
    parent: *mut TreeNode,
    left: *mut TreeNode,
    right: *mut TreeNode,
}

/// Bookkeeping record immediately preceding every live user span.
#[repr(C)]
struct AllocHeader {
    /// Bytes reserved for the user, padding included
    payload_size: usize,
    /// Alignment padding between the span start and this header
    adjustment: usize,
}

const NODE_SIZE: usize = size_of::<TreeNode>();
const HEADER_SIZE: usize = size_of::<AllocHeader>();

/// Smallest payload a live span may carry: when freed, the span must be
/// able to host a [`TreeNode`] again.
const MIN_PAYLOAD: usize = NODE_SIZE - HEADER_SIZE;

/// Every span boundary stays a multiple of this, so in-place node and
/// header construction is always aligned. Payload sizes are rounded up
/// accordingly.
const SPAN_ALIGN: usize = align_of::<TreeNode>();

/// Subtree-max free-tree allocator over one owned region.
pub struct FreeTreeAllocator {
    region: Region,

    /// Tree root; null when the region is fully reserved
    root: Cell<*mut TreeNode>,
}

impl FreeTreeAllocator {
    /// Reserves `capacity` bytes and covers them with a single root span.
    ///
    /// # Panics
    /// Panics if `capacity` cannot hold one tree node.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= NODE_SIZE,
            "region must hold at least one tree node"
        );

        let allocator = Self {
            region: Region::new(capacity),
            root: Cell::new(ptr::null_mut()),
        };
        let root = allocator.node_at(allocator.region.start(), capacity);
        allocator.root.set(root);

        #[cfg(feature = "logging")]
        debug!(capacity, "free-tree allocator constructed");

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

    /// Size of the largest free span; O(1) from the root's subtree-max.
    pub fn largest_free_span(&self) -> usize {
        let root = self.root.get();
        if root.is_null() {
            0
        } else {
            // SAFETY: root is a live node.
            unsafe { (*root).max_size }
        }
    }

    /// Number of free spans in the tree.
    pub fn free_span_count(&self) -> usize {
        fn count(node: *mut TreeNode) -> usize {
            if node.is_null() {
                return 0;
            }
            // SAFETY: tree links only ever point at live TreeNodes.
            unsafe { 1 + count((*node).left) + count((*node).right) }
        }
        count(self.root.get())
    }

    /// Constructs an unlinked free node in place at `addr`.
    fn node_at(&self, addr: usize, size: usize) -> *mut TreeNode {
        let node = self.region.ptr_at(addr).cast::<TreeNode>();
        debug_assert!(addr % SPAN_ALIGN == 0);
        debug_assert!(size >= NODE_SIZE);
        // SAFETY: addr is a span boundary inside the buffer with at least
        // NODE_SIZE free bytes; the bytes belong to no live allocation.
        unsafe {
            node.write(TreeNode {
                size,
                max_size: size,
                parent: ptr::null_mut(),
                left: ptr::null_mut(),
                right: ptr::null_mut(),
            });
        }
        node
    }

    /// Descends for a span of at least `required` bytes.
    ///
    /// Skips any subtree whose `max_size` is too small; otherwise goes left
    /// while the left subtree can still satisfy the request, accepts the
    /// current node when it fits, and falls through to the right subtree
    /// last. The result is the lowest-addressed fitting span, found in one
    /// root-to-node walk.
    fn find_node(&self, required: usize) -> *mut TreeNode {
        let mut curr = self.root.get();
        loop {
            // SAFETY: tree links only ever point at live TreeNodes.
            unsafe {
                if curr.is_null() || (*curr).max_size < required {
                    return ptr::null_mut();
                }
                let left = (*curr).left;
                if !left.is_null() && (*left).max_size >= required {
                    curr = left;
                } else if (*curr).size >= required {
                    return curr;
                } else {
                    curr = (*curr).right;
                }
            }
        }
    }

    /// Inserts an unlinked node at its address-ordered position, raising
    /// `max_size` along the descent path.
    fn insert_node(&self, new_node: *mut TreeNode) {
        let root = self.root.get();
        if root.is_null() {
            self.root.set(new_node);
            return;
        }

        // SAFETY: tree links only ever point at live TreeNodes; the descent
        // path is exactly the set of new ancestors, so the incremental
        // max(old, new.size) update is the full fixup.
        unsafe {
            let mut curr = root;
            let mut prev = ptr::null_mut();
            while !curr.is_null() {
                prev = curr;
                (*curr).max_size = (*curr).max_size.max((*new_node).size);
                curr = if (new_node as usize) < (curr as usize) {
                    (*curr).left
                } else {
                    (*curr).right
                };
            }

            (*new_node).parent = prev;
            if (new_node as usize) < (prev as usize) {
                (*prev).left = new_node;
            } else {
                (*prev).right = new_node;
            }
        }
    }

    /// Standard BST removal: shift the single child up, or splice in the
    /// in-order successor; then recompute `max_size` from the lowest node
    /// whose structure changed up to the root.
    fn remove_node(&self, node: *mut TreeNode) {
        // SAFETY: node is a live tree member; every pointer touched below
        // is one of its relatives.
        unsafe {
            let mut fixup = (*node).parent;

            if (*node).left.is_null() {
                self.shift_up(node, (*node).right);
            } else if (*node).right.is_null() {
                self.shift_up(node, (*node).left);
            } else {
                let mut succ = (*node).right;
                while !(*succ).left.is_null() {
                    succ = (*succ).left;
                }

                if (*succ).parent != node {
                    fixup = (*succ).parent;
                    self.shift_up(succ, (*succ).right);
                    (*succ).right = (*node).right;
                    (*(*succ).right).parent = succ;
                } else {
                    fixup = succ;
                }
                self.shift_up(node, succ);
                (*succ).left = (*node).left;
                (*(*succ).left).parent = succ;
            }

            self.update_max_size(fixup);
        }
    }

    /// Puts `new_node` where `target` sits, inheriting parent and both
    /// children, then recomputes `max_size` from the replacement upward.
    fn replace_node(&self, target: *mut TreeNode, new_node: *mut TreeNode) {
        // SAFETY: target is a live tree member; new_node is unlinked.
        unsafe {
            if target == self.root.get() {
                self.root.set(new_node);
            } else {
                (*new_node).parent = (*target).parent;
                if target == (*(*target).parent).left {
                    (*(*target).parent).left = new_node;
                } else {
                    (*(*target).parent).right = new_node;
                }
            }

            if !(*target).left.is_null() {
                (*new_node).left = (*target).left;
                (*(*new_node).left).parent = new_node;
            }
            if !(*target).right.is_null() {
                (*new_node).right = (*target).right;
                (*(*new_node).right).parent = new_node;
            }

            // Start at the replacement itself: its cached max must absorb
            // the inherited children before the ancestors read it.
            self.update_max_size(new_node);
        }
    }

    /// Unlinks `target` by putting `node` (possibly null) into its slot.
    fn shift_up(&self, target: *mut TreeNode, node: *mut TreeNode) {
        // SAFETY: target is a live tree member; node is null or a live
        // relative being promoted.
        unsafe {
            if !node.is_null() {
                (*node).parent = (*target).parent;
            }

            if target == self.root.get() {
                self.root.set(node);
            } else if target == (*(*target).parent).left {
                (*(*target).parent).left = node;
            } else {
                (*(*target).parent).right = node;
            }
        }
    }

    /// Recomputes `max_size` from `node` up to the root.
    fn update_max_size(&self, mut node: *mut TreeNode) {
        // SAFETY: node is null or a live tree member; the walk follows
        // parent links which always lead to the root.
        unsafe {
            while !node.is_null() {
                let mut max = (*node).size;
                if !(*node).left.is_null() {
                    max = max.max((*(*node).left).max_size);
                }
                if !(*node).right.is_null() {
                    max = max.max((*(*node).right).max_size);
                }
                (*node).max_size = max;
                node = (*node).parent;
            }
        }
    }

    /// Walks the would-be insertion path of `addr` without inserting.
    ///
    /// The last node left behind on a right turn is the address
    /// predecessor, the last on a left turn the address successor.
    fn find_neighbors(&self, addr: usize) -> (*mut TreeNode, *mut TreeNode) {
        let mut pred = ptr::null_mut();
        let mut succ = ptr::null_mut();
        let mut curr = self.root.get();
        // SAFETY: tree links only ever point at live TreeNodes; addr never
        // collides with a tree member (spans are disjoint).
        unsafe {
            while !curr.is_null() {
                if addr < curr as usize {
                    succ = curr;
                    curr = (*curr).left;
                } else {
                    pred = curr;
                    curr = (*curr).right;
                }
            }
        }
        (pred, succ)
    }
}

// SAFETY: pointers are carved out of free spans of the owned region; the
// header written in front of each one records exactly the span taken, and
// deallocate returns that span to the tree before anything reuses it.
unsafe impl Allocator for FreeTreeAllocator {
    unsafe fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        assert!(layout.size() > 0, "zero-size allocation is a contract violation");

        // Pad so the span can host a tree node when released, and so the
        // next span boundary stays aligned for node placement.
        let mut payload = align_up(layout.size().max(MIN_PAYLOAD), SPAN_ALIGN);
        let required = payload + HEADER_SIZE + layout.align() - 1;

        let node = self.find_node(required);
        if node.is_null() {
            self.region.record_failed();
            return Err(OutOfRegion::for_layout(layout));
        }

        let span_addr = node as usize;
        // SAFETY: node is the live span found above.
        let span_size = unsafe { (*node).size };

        let adjustment = align_adjustment(span_addr + HEADER_SIZE, layout.align());
        let user = span_addr + adjustment + HEADER_SIZE;

        // Carve the tail into a replacement node when it can still be
        // tracked; otherwise the whole span is consumed and removed.
        let remainder = span_addr + span_size - (user + payload);
        if remainder >= NODE_SIZE {
            let tail = self.node_at(user + payload, remainder);
            self.replace_node(node, tail);
        } else {
            payload += remainder;
            self.remove_node(node);
        }

        let header = self.region.ptr_at(user - HEADER_SIZE).cast::<AllocHeader>();
        // SAFETY: the header slot lies inside the span just taken out of
        // the tree; user - HEADER_SIZE is SPAN_ALIGN-aligned.
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
        let span_start = user - header.adjustment - HEADER_SIZE;
        let mut span_len = header.adjustment + HEADER_SIZE + header.payload_size;

        self.region.sub_used(span_len);
        self.region.record_dealloc();

        let (pred, succ) = self.find_neighbors(span_start);

        // Absorb the right neighbor first so a doubly-adjacent span folds
        // into the predecessor in one piece.
        // SAFETY: pred/succ are live tree members (or null).
        unsafe {
            if !succ.is_null() && span_start + span_len == succ as usize {
                span_len += (*succ).size;
                self.remove_node(succ);
            }

            if !pred.is_null() && pred as usize + (*pred).size == span_start {
                (*pred).size += span_len;
                self.update_max_size(pred);
            } else {
                let node = self.node_at(span_start, span_len);
                self.insert_node(node);
            }
        }
    }
}

impl Resettable for FreeTreeAllocator {
    unsafe fn reset(&self) {
        let root = self.node_at(self.region.start(), self.region.capacity());
        self.root.set(root);
        self.region.reset_accounting();

        #[cfg(feature = "logging")]
        trace!("free-tree allocator reset");
    }
}

impl MemoryUsage for FreeTreeAllocator {
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

impl StatisticsProvider for FreeTreeAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.region.statistics()
    }

    fn reset_statistics(&self) {
        self.region.reset_statistics();
    }
}

// SAFETY: the tree pointers all target the exclusively owned buffer; moving
// the allocator moves the buffer and the tree together. Cell fields keep
// the type !Sync.
unsafe impl Send for FreeTreeAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recursively checked structural facts about a subtree.
    struct Subtree {
        max_size: usize,
        total_free: usize,
        count: usize,
    }

    /// Checks BST order, parent links and the subtree-max invariant,
    /// returning the subtree summary. Bounds are exclusive address limits.
    fn check(node: *mut TreeNode, lo: usize, hi: usize) -> Subtree {
        if node.is_null() {
            return Subtree { max_size: 0, total_free: 0, count: 0 };
        }

        let addr = node as usize;
        assert!(lo < addr && addr < hi, "BST order violated at {addr:#x}");

        unsafe {
            let left = (*node).left;
            let right = (*node).right;
            if !left.is_null() {
                assert_eq!((*left).parent, node, "left child parent link broken");
            }
            if !right.is_null() {
                assert_eq!((*right).parent, node, "right child parent link broken");
            }

            let l = check(left, lo, addr);
            let r = check(right, addr, hi);

            let expected = (*node).size.max(l.max_size).max(r.max_size);
            assert_eq!(
                (*node).max_size,
                expected,
                "subtree-max wrong at {addr:#x}:\n{}",
                dump(node, 0)
            );

            Subtree {
                max_size: expected,
                total_free: (*node).size + l.total_free + r.total_free,
                count: 1 + l.count + r.count,
            }
        }
    }

    /// Renders `size:max` per node, children indented, for failure output.
    fn dump(node: *mut TreeNode, depth: usize) -> String {
        if node.is_null() {
            return String::new();
        }
        unsafe {
            let mut out = format!(
                "{}{}:{}\n",
                "    ".repeat(depth),
                (*node).size,
                (*node).max_size
            );
            out.push_str(&dump((*node).left, depth + 1));
            out.push_str(&dump((*node).right, depth + 1));
            out
        }
    }

    fn assert_tree_consistent(allocator: &FreeTreeAllocator) {
        let summary = check(allocator.root.get(), 0, usize::MAX);
        assert_eq!(
            summary.total_free,
            allocator.capacity() - allocator.used(),
            "free span total disagrees with the accounting"
        );
        assert_eq!(summary.count, allocator.free_span_count());
    }

    #[test]
    fn node_and_header_geometry() {
        assert!(NODE_SIZE > HEADER_SIZE);
        assert_eq!(MIN_PAYLOAD % SPAN_ALIGN, 0);
        assert_eq!(HEADER_SIZE % SPAN_ALIGN, 0);
    }

    #[test]
    fn invariants_hold_through_carve_consume_and_merge() {
        let allocator = FreeTreeAllocator::new(4096);
        assert_tree_consistent(&allocator);

        unsafe {
            let layout = Layout::from_size_align(100, 8).unwrap();
            let mut live = Vec::new();
            for _ in 0..8 {
                live.push(allocator.allocate(layout).unwrap());
                assert_tree_consistent(&allocator);
            }

            // Free every other span: no merges, tree grows.
            for ptr in live.iter().step_by(2) {
                allocator.deallocate(ptr.cast());
                assert_tree_consistent(&allocator);
            }

            // Free the rest: neighbors merge back.
            for ptr in live.iter().skip(1).step_by(2) {
                allocator.deallocate(ptr.cast());
                assert_tree_consistent(&allocator);
            }
        }

        assert_eq!(allocator.used(), 0);
        assert_eq!(allocator.free_span_count(), 1);
        assert_eq!(allocator.largest_free_span(), 4096);
    }

    #[test]
    fn removal_with_two_children_keeps_parent_links() {
        let allocator = FreeTreeAllocator::new(8192);

        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let mut live: Vec<_> = (0..16)
                .map(|_| allocator.allocate(layout).unwrap())
                .collect();

            // Build an address-scattered tree, then drain it in an order
            // that exercises the two-children removal arm.
            for i in [1usize, 5, 9, 13, 3, 11, 7, 15] {
                allocator.deallocate(live[i].cast());
                assert_tree_consistent(&allocator);
            }
            for i in [0usize, 2, 4, 6, 8, 10, 12, 14] {
                allocator.deallocate(live[i].cast());
                assert_tree_consistent(&allocator);
            }
            live.clear();
        }

        assert_eq!(allocator.free_span_count(), 1);
    }
}
