use std::alloc::Layout;
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr::NonNull;
use std::slice;

use crate::{Error, PageAllocator, Result};

/// One fixed-size block of `PAGE_SIZE` item slots, allocated as a single unit.
///
/// A page does not know which of its slots are initialized. That is tracked by the owner via the
/// length of the collection. Pages are never moved or resized once allocated, which is what gives
/// items their stable addresses.
///
/// The type is a transparent wrapper over a non-null pointer, so `Option<Page>` is pointer-sized
/// and can be stored directly in the page table.
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct Page<T, const PAGE_SIZE: usize> {
    first_slot: NonNull<T>,

    _owns: PhantomData<T>,
}

impl<T, const PAGE_SIZE: usize> Page<T, PAGE_SIZE> {
    /// The layout of the memory block backing one page.
    ///
    /// The block is aligned to at least the alignment of a pointer, even for items with a lower
    /// alignment requirement.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized or if the page does not fit in a single allocation.
    #[must_use]
    #[inline]
    pub(crate) fn layout() -> Layout {
        assert!(size_of::<T>() > 0, "PagedVec must have non-zero item size");

        let align = align_of::<T>().max(align_of::<*const ()>());

        let size = size_of::<T>()
            .checked_mul(PAGE_SIZE)
            .expect("PagedVec page size in bytes must not overflow usize");

        Layout::from_size_align(size, align)
            .expect("PagedVec page must fit in a single allocation")
            .pad_to_align()
    }

    /// Allocates a new page with all slots uninitialized.
    pub(crate) fn allocate<A: PageAllocator>(allocator: &A) -> Result<Self> {
        let layout = Self::layout();

        let ptr = allocator
            .allocate(layout)
            .ok_or(Error::AllocationFailed { layout })?;

        Ok(Self {
            first_slot: ptr.cast(),
            _owns: PhantomData,
        })
    }

    /// Returns the page's memory block to the allocator.
    ///
    /// # Safety
    ///
    /// The page must have been allocated from the same allocator. Any items still stored in the
    /// page are not dropped; the caller must have dropped them already (or be leaking them).
    pub(crate) unsafe fn deallocate<A: PageAllocator>(self, allocator: &A) {
        // SAFETY: Forwarding guarantee from caller that the page came from this allocator.
        // The layout is a pure function of the type, so it matches the one used for allocation.
        unsafe {
            allocator.deallocate(self.first_slot.cast(), Self::layout());
        }
    }

    /// Returns a pointer to the slot at `offset`.
    ///
    /// The slot may or may not be initialized.
    #[must_use]
    #[inline]
    pub(crate) fn slot(&self, offset: usize) -> NonNull<T> {
        debug_assert!(
            offset < PAGE_SIZE,
            "slot offset {offset} out of bounds for page size {PAGE_SIZE}"
        );

        // SAFETY: The offset is within the page's allocation because offset < PAGE_SIZE.
        unsafe { self.first_slot.add(offset) }
    }

    /// Returns the initialized items in `range` as a shared slice.
    ///
    /// # Safety
    ///
    /// Every slot in `range` must be initialized and `range.end <= PAGE_SIZE`. The caller chooses
    /// the lifetime and must not let it outlive the items or overlap a mutable borrow of them.
    #[must_use]
    #[inline]
    pub(crate) unsafe fn items<'a>(&self, range: Range<usize>) -> &'a [T] {
        debug_assert!(range.start <= range.end && range.end <= PAGE_SIZE);

        // SAFETY: Forwarding guarantees from the caller. The range is within the allocation.
        unsafe { slice::from_raw_parts(self.slot(range.start).as_ptr(), range.len()) }
    }
}

// The page table relies on this to store pages in a plain pointer array.
const _: () = assert!(size_of::<Option<Page<u64, 16>>>() == size_of::<*const ()>());

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::GlobalPageAllocator;

    #[test]
    fn layout_is_pointer_aligned() {
        let layout = Page::<u8, 10>::layout();

        assert_eq!(layout.size() % align_of::<*const ()>(), 0);
        assert_eq!(layout.align(), align_of::<*const ()>());
        assert!(layout.size() >= 10);
    }

    #[test]
    fn layout_respects_over_aligned_items() {
        #[repr(align(64))]
        struct Wide(#[expect(dead_code, reason = "only the layout matters")] u8);

        let layout = Page::<Wide, 3>::layout();

        assert_eq!(layout.align(), 64);
        assert_eq!(layout.size(), 3 * 64);
    }

    #[test]
    fn allocate_write_read_deallocate() {
        let page = Page::<u32, 4>::allocate(&GlobalPageAllocator).unwrap();

        for offset in 0..4 {
            // SAFETY: The slot is within the page and we are the only user of the page.
            unsafe {
                page.slot(offset).write(offset as u32 * 10);
            }
        }

        // SAFETY: All four slots were initialized above.
        let items = unsafe { page.items(1..4) };
        assert_eq!(items, &[10, 20, 30]);

        // SAFETY: Allocated from this allocator; u32 needs no drop.
        unsafe {
            page.deallocate(&GlobalPageAllocator);
        }
    }

    #[test]
    #[should_panic(expected = "non-zero item size")]
    fn zero_sized_items_are_rejected() {
        let _layout = Page::<(), 4>::layout();
    }

    #[test]
    fn slots_are_contiguous() {
        let page = Page::<u64, 8>::allocate(&GlobalPageAllocator).unwrap();

        let first = page.slot(0).as_ptr() as usize;
        let last = page.slot(7).as_ptr() as usize;
        assert_eq!(last - first, 7 * size_of::<u64>());

        // SAFETY: Allocated from this allocator; nothing was written.
        unsafe {
            page.deallocate(&GlobalPageAllocator);
        }
    }
}
