//! Bulk construction, destruction and relocation of items, one page at a time.
//!
//! Every bulk operation walks the affected positions as a sequence of [`Segment`]s, each confined
//! to a single page, and does its work on each segment as one batch. Operations on types that need
//! no per-item code (`Copy`, `Zeroable` or no drop glue) reduce to one memory operation per page.

use std::ops::Range;
use std::{mem, ptr};

use bytemuck::Zeroable;

use crate::{PageAllocator, PageCoordinates, PageTable};

/// A run of consecutive logical positions that all live in the same page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Segment {
    /// The page holding the positions.
    pub(crate) page_index: usize,

    /// The offsets within the page.
    pub(crate) offsets: Range<usize>,
}

impl Segment {
    #[must_use]
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }
}

/// Splits the logical positions `range` into per-page segments, in ascending order.
#[must_use]
#[inline]
pub(crate) fn segments<const PAGE_SIZE: usize>(range: Range<usize>) -> Segments<PAGE_SIZE> {
    Segments {
        next: range.start,
        end: range.end,
    }
}

/// Iterator returned by [`segments()`].
#[derive(Debug)]
pub(crate) struct Segments<const PAGE_SIZE: usize> {
    next: usize,
    end: usize,
}

impl<const PAGE_SIZE: usize> Iterator for Segments<PAGE_SIZE> {
    type Item = Segment;

    #[inline]
    fn next(&mut self) -> Option<Segment> {
        if self.next >= self.end {
            return None;
        }

        let coordinates = PageCoordinates::from_position::<PAGE_SIZE>(self.next);

        // Cannot overflow because offset < PAGE_SIZE and next < end.
        let room_in_page = PAGE_SIZE.wrapping_sub(coordinates.offset());
        let remaining = self.end.wrapping_sub(self.next);
        let count = room_in_page.min(remaining);

        // Cannot overflow because count <= remaining.
        self.next = self.next.wrapping_add(count);

        Some(Segment {
            page_index: coordinates.page_index(),
            // Cannot overflow because the result is at most PAGE_SIZE.
            offsets: coordinates.offset()..coordinates.offset().wrapping_add(count),
        })
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PageTable<T, PAGE_SIZE, A> {
    /// Returns a raw slice pointer covering the slots of a segment.
    #[must_use]
    #[inline]
    fn segment_ptr(&self, segment: &Segment) -> *mut [T] {
        let first = self.page(segment.page_index).slot(segment.offsets.start);

        ptr::slice_from_raw_parts_mut(first.as_ptr(), segment.len())
    }

    /// Fills the slots from `*len` up to `new_len` with values produced by `f`.
    ///
    /// `*len` is advanced after every item, so if `f` panics, the items written so far are
    /// accounted for and will be dropped by the owner.
    ///
    /// # Safety
    ///
    /// `*len` must be the number of initialized items at the front of the table and
    /// `new_len` must not exceed the capacity of the table.
    pub(crate) unsafe fn construct_with<F>(&mut self, len: &mut usize, new_len: usize, mut f: F)
    where
        F: FnMut() -> T,
    {
        debug_assert!(new_len <= self.capacity());

        for segment in segments::<PAGE_SIZE>(*len..new_len) {
            let page = self.page(segment.page_index);

            for offset in segment.offsets {
                // SAFETY: The slot is within an allocated page and above the initialized prefix,
                // so we are not overwriting a live item.
                unsafe {
                    page.slot(offset).write(f());
                }

                // Cannot overflow because it stays below new_len.
                *len = len.wrapping_add(1);
            }
        }
    }

    /// Fills the slots from `old_len` up to `new_len` with all-zero bytes, one page at a time.
    ///
    /// # Safety
    ///
    /// The slots must be uninitialized and `new_len` must not exceed the capacity of the table.
    pub(crate) unsafe fn construct_zeroed(&mut self, old_len: usize, new_len: usize)
    where
        T: Zeroable,
    {
        debug_assert!(new_len <= self.capacity());

        for segment in segments::<PAGE_SIZE>(old_len..new_len) {
            let first = self.page(segment.page_index).slot(segment.offsets.start);

            // SAFETY: The segment is within an allocated page. All-zero is a valid T because
            // T: Zeroable. The slots hold no live items that would need dropping.
            unsafe {
                first.write_bytes(0, segment.len());
            }
        }
    }

    /// Copies the first `count` items of `source` into the first `count` slots of this table with
    /// one memory copy per page.
    ///
    /// # Safety
    ///
    /// `source` must hold at least `count` initialized items, this table must have capacity for
    /// `count` items and its slots in that range must hold no live items.
    pub(crate) unsafe fn copy_from_table<B: PageAllocator>(
        &mut self,
        source: &PageTable<T, PAGE_SIZE, B>,
        count: usize,
    ) where
        T: Copy,
    {
        debug_assert!(count <= self.capacity());

        for segment in segments::<PAGE_SIZE>(0..count) {
            let from = source.page(segment.page_index).slot(segment.offsets.start);
            let to = self.page(segment.page_index).slot(segment.offsets.start);

            // SAFETY: Both segments are within allocated pages of distinct tables, so they do not
            // overlap. The source items are initialized; T: Copy makes a bitwise copy valid.
            unsafe {
                to.copy_from_nonoverlapping(from, segment.len());
            }
        }
    }

    /// Clones the first `count` items of `source` into the first `count` slots of this table, one
    /// page at a time.
    ///
    /// `*len` is advanced after every item, so a panicking `clone()` leaves a consistent table.
    ///
    /// # Safety
    ///
    /// `source` must hold at least `count` initialized items, `*len` must be zero with no live
    /// items in this table and `count` must not exceed its capacity.
    pub(crate) unsafe fn clone_from_table<B: PageAllocator>(
        &mut self,
        len: &mut usize,
        source: &PageTable<T, PAGE_SIZE, B>,
        count: usize,
    ) where
        T: Clone,
    {
        debug_assert!(*len == 0);
        debug_assert!(count <= self.capacity());

        for segment in segments::<PAGE_SIZE>(0..count) {
            // SAFETY: The segment is within the initialized prefix of the source.
            let items = unsafe {
                source
                    .page(segment.page_index)
                    .items(segment.offsets.clone())
            };

            // Both tables start at position zero, so the segment has the same coordinates here.
            let destination = self.page(segment.page_index).slot(segment.offsets.start);

            for (index, item) in items.iter().enumerate() {
                // SAFETY: The slot is within the same page segment, which is within capacity and
                // above our initialized prefix.
                unsafe {
                    destination.add(index).write(item.clone());
                }

                // Cannot overflow because it stays below capacity.
                *len = len.wrapping_add(1);
            }
        }
    }

    /// Drops the items at the logical positions `range`, one batch per page.
    ///
    /// Does nothing for types without drop glue.
    ///
    /// # Safety
    ///
    /// Every slot in `range` must hold a live item and none of them may be used again. The owner
    /// must already consider these slots vacant so that a panicking destructor cannot cause a
    /// double drop.
    pub(crate) unsafe fn drop_range(&mut self, range: Range<usize>) {
        if !mem::needs_drop::<T>() {
            return;
        }

        for segment in segments::<PAGE_SIZE>(range) {
            let items = self.segment_ptr(&segment);

            // SAFETY: Forwarding guarantee from the caller that these are live items that will
            // not be used again.
            unsafe {
                ptr::drop_in_place(items);
            }
        }
    }

    /// Moves `count` items from positions starting at `source` to positions starting at
    /// `destination`, which must come earlier. Moves are bitwise, one batch per pair of pages.
    ///
    /// # Safety
    ///
    /// The source range must hold live items and the destination slots not overlapped by the
    /// source must be vacant. After the call, the source slots not overlapped by the destination
    /// are vacant.
    pub(crate) unsafe fn shift_down(&mut self, source: usize, destination: usize, count: usize) {
        debug_assert!(destination <= source);

        let mut moved = 0_usize;

        while moved < count {
            // Cannot overflow because both stay within the initialized prefix.
            let from = PageCoordinates::from_position::<PAGE_SIZE>(source.wrapping_add(moved));
            let to = PageCoordinates::from_position::<PAGE_SIZE>(destination.wrapping_add(moved));

            let batch = PAGE_SIZE
                .wrapping_sub(from.offset())
                .min(PAGE_SIZE.wrapping_sub(to.offset()))
                .min(count.wrapping_sub(moved));

            let from_ptr = self.page(from.page_index()).slot(from.offset());
            let to_ptr = self.page(to.page_index()).slot(to.offset());

            // SAFETY: Both runs are within a single allocated page each. They may overlap when
            // both are in the same page, which `copy_to` permits.
            unsafe {
                from_ptr.copy_to(to_ptr, batch);
            }

            moved = moved.wrapping_add(batch);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use super::*;
    use crate::GlobalPageAllocator;

    type Table<T, const PAGE_SIZE: usize> = PageTable<T, PAGE_SIZE, GlobalPageAllocator>;

    fn read_all<T: Clone, const PAGE_SIZE: usize>(table: &Table<T, PAGE_SIZE>, len: usize) -> Vec<T> {
        (0..len)
            // SAFETY: Tests only read positions below the initialized length.
            .map(|position| unsafe { table.slot(position).as_ref().clone() })
            .collect()
    }

    fn filled<const PAGE_SIZE: usize>(count: usize) -> (Table<u32, PAGE_SIZE>, usize) {
        let mut table = Table::<u32, PAGE_SIZE>::new(GlobalPageAllocator);
        table.reserve(count);

        let mut len = 0;
        let mut next = 0_u32;

        // SAFETY: The table is empty and has capacity for count items.
        unsafe {
            table.construct_with(&mut len, count, || {
                next += 1;
                next - 1
            });
        }

        (table, len)
    }

    #[test]
    fn segments_split_at_page_boundaries() {
        let all: Vec<_> = segments::<4>(2..11).collect();

        assert_eq!(
            all,
            vec![
                Segment { page_index: 0, offsets: 2..4 },
                Segment { page_index: 1, offsets: 0..4 },
                Segment { page_index: 2, offsets: 0..3 },
            ]
        );
    }

    #[test]
    fn segments_of_empty_range() {
        assert_eq!(segments::<4>(5..5).count(), 0);
    }

    #[test]
    fn segments_non_power_of_two() {
        let lengths: Vec<_> = segments::<3>(0..10).map(|s| s.len()).collect();

        assert_eq!(lengths, vec![3, 3, 3, 1]);
    }

    #[test]
    fn construct_with_fills_across_pages() {
        let (table, len) = filled::<4>(10);

        assert_eq!(len, 10);
        assert_eq!(read_all(&table, len), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn construct_zeroed_fills_with_zero() {
        let mut table = Table::<u64, 4>::new(GlobalPageAllocator);
        table.reserve(9);

        // SAFETY: The table is empty and has capacity for 9 items.
        unsafe {
            table.construct_zeroed(0, 9);
        }

        assert_eq!(read_all(&table, 9), vec![0; 9]);
    }

    #[test]
    fn copy_from_table_copies_pages() {
        let (source, len) = filled::<4>(7);

        let mut target = Table::<u32, 4>::new(GlobalPageAllocator);
        target.reserve(len);

        // SAFETY: The source holds len items and the target is empty with enough capacity.
        unsafe {
            target.copy_from_table(&source, len);
        }

        assert_eq!(read_all(&target, len), read_all(&source, len));
    }

    #[test]
    fn clone_from_table_advances_len() {
        let (source, len) = filled::<3>(8);

        let mut target = Table::<u32, 3>::new(GlobalPageAllocator);
        target.reserve(len);
        let mut target_len = 0;

        // SAFETY: The source holds len items and the target is empty with enough capacity.
        unsafe {
            target.clone_from_table(&mut target_len, &source, len);
        }

        assert_eq!(target_len, len);
        assert_eq!(read_all(&target, len), read_all(&source, len));
    }

    #[test]
    fn clone_from_table_counts_items_before_panic() {
        #[derive(Debug)]
        struct Fragile(u32);

        impl Clone for Fragile {
            fn clone(&self) -> Self {
                assert!(self.0 != 5, "refusing to clone 5");
                Self(self.0)
            }
        }

        let mut source = PageTable::<Fragile, 3, GlobalPageAllocator>::new(GlobalPageAllocator);
        source.reserve(8);
        let mut source_len = 0;
        let mut next = 0_u32;

        // SAFETY: The table is empty and has capacity for 8 items.
        unsafe {
            source.construct_with(&mut source_len, 8, || {
                next += 1;
                Fragile(next - 1)
            });
        }

        let mut target = PageTable::<Fragile, 3, GlobalPageAllocator>::new(GlobalPageAllocator);
        target.reserve(8);
        let mut target_len = 0;

        let result = catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: The source holds 8 items and the target is empty with enough capacity.
            unsafe {
                target.clone_from_table(&mut target_len, &source, 8);
            }
        }));

        assert!(result.is_err());
        assert_eq!(target_len, 5);

        // SAFETY: Tests only read positions below the initialized length.
        let cloned: Vec<u32> = (0..target_len)
            .map(|position| unsafe { target.slot(position).as_ref().0 })
            .collect();
        assert_eq!(cloned, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn shift_down_across_pages() {
        let (mut table, len) = filled::<4>(10);

        // Remove positions 2..5 by moving 5..10 down to 2..7.
        // SAFETY: u32 has no drop glue, so the overwritten slots need no cleanup.
        unsafe {
            table.shift_down(5, 2, 5);
        }

        assert_eq!(read_all(&table, len - 3), vec![0, 1, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn shift_down_by_one_within_page() {
        let (mut table, len) = filled::<8>(6);

        // SAFETY: u32 has no drop glue, so the overwritten slot needs no cleanup.
        unsafe {
            table.shift_down(1, 0, 5);
        }

        assert_eq!(read_all(&table, len - 1), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn drop_range_drops_each_item_once() {
        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let counter = Rc::new(Cell::new(0));

        let mut table = PageTable::<Counted, 4, GlobalPageAllocator>::new(GlobalPageAllocator);
        table.reserve(10);

        let mut len = 0;

        // SAFETY: The table is empty and has capacity for 10 items.
        unsafe {
            table.construct_with(&mut len, 10, || Counted(Rc::clone(&counter)));
        }

        // SAFETY: Positions 3..10 hold live items that are not used again.
        unsafe {
            table.drop_range(3..10);
        }
        assert_eq!(counter.get(), 7);

        // SAFETY: Positions 0..3 hold live items that are not used again.
        unsafe {
            table.drop_range(0..3);
        }
        assert_eq!(counter.get(), 10);
    }
}
