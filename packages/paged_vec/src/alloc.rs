use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

/// Source of raw memory for the pages of a [`PagedVec`][crate::PagedVec] and for its page table.
///
/// The collection asks for memory in two shapes: page buffers (`PAGE_SIZE` items, aligned to at
/// least the alignment of a pointer) and the page table itself (an array of page pointers).
/// All requests have a non-zero size.
///
/// The allocator is injected when the collection is built, via
/// [`PagedVecBuilder::allocator()`][crate::PagedVecBuilder::allocator], and is owned by the
/// collection for its entire lifetime.
///
/// # Safety
///
/// Implementations must return either `None` or a pointer to a block of memory that satisfies
/// the size and alignment of the requested layout and that remains valid until it is passed back
/// to [`deallocate()`][Self::deallocate] with the same layout. Blocks must not overlap.
pub unsafe trait PageAllocator {
    /// Allocates a block of memory for the given non-zero-sized layout.
    ///
    /// Returns `None` if the memory could not be provided. The contents of the block are
    /// unspecified.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block of memory previously returned by [`allocate()`][Self::allocate].
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by `allocate()` on this allocator with the
    /// same `layout` and has not been deallocated yet.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// A [`PageAllocator`] that forwards to the Rust global allocator. This is the default.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalPageAllocator;

// SAFETY: We forward to the global allocator, which upholds the same contract.
unsafe impl PageAllocator for GlobalPageAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(
            layout.size() > 0,
            "page allocator must never be asked for zero-sized blocks"
        );

        // SAFETY: The layout is non-zero-sized, which is the only requirement of `alloc()`.
        NonNull::new(unsafe { alloc(layout) })
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding safety requirements to the caller, who guarantees the block came
        // from `allocate()` (and thus from the global allocator) with the same layout.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}
