use std::mem;

use scopeguard::guard;

use crate::{Cursor, PageAllocator, PagedVec};

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PagedVec<T, PAGE_SIZE, A> {
    /// Removes the item at the cursor, shifting all later items one position towards the front.
    ///
    /// Returns a cursor at the position of the removed item, which now holds the item that
    /// followed it (or is the end). Invalidates cursors at or after the removed position.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`][crate::Fault] if the cursor is at the end, invalidated or from a
    /// different collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let mut items = PagedVec::<u32, 2>::from([1, 2, 3, 4, 5]);
    ///
    /// let next = items.erase(items.cursor(1));
    ///
    /// assert_eq!(*items.at_cursor(next), 3);
    /// assert_eq!(items, PagedVec::<u32, 2>::from([1, 3, 4, 5]));
    /// ```
    pub fn erase(&mut self, cursor: Cursor) -> Cursor {
        let index = self.verify_dereferenceable(cursor);

        drop(self.remove_at(index));

        self.cursor_at(index)
    }

    /// Removes the items in the range `[first, last)`, shifting all later items towards the front.
    ///
    /// Returns a cursor at `first`, which now holds the item that followed the range (or is the
    /// end). An empty range removes nothing and invalidates nothing. Otherwise, invalidates
    /// cursors at or after `first`.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`][crate::Fault] if either cursor is invalidated or from a different
    /// collection, or if `first` comes after `last`.
    pub fn erase_range(&mut self, first: Cursor, last: Cursor) -> Cursor {
        let (first_index, last_index) = self.verify_range(first, last);

        if first_index == last_index {
            return self.cursor_at(first_index);
        }

        // Cannot overflow because both are within [0, len] and first <= last.
        let tail_len = self.len.wrapping_sub(last_index);

        // The removed items and the tail are not counted in the length while we work, so a
        // panicking destructor can at worst leak items, never drop anything twice.
        self.len = first_index;
        self.registry.invalidate_from(first_index);

        let mut this = guard(&mut *self, |this| {
            // SAFETY: The removed range is vacant (dropped or leaked) and the tail is live.
            unsafe {
                this.table.shift_down(last_index, first_index, tail_len);
            }

            // Cannot overflow because the result is less than the old length.
            this.len = first_index.wrapping_add(tail_len);
        });

        // SAFETY: The range holds live items that are no longer counted in the length.
        unsafe {
            this.table.drop_range(first_index..last_index);
        }

        // Shifts the tail down.
        drop(this);

        self.cursor_at(first_index)
    }

    /// Removes the item at the cursor by moving the last item into its place.
    ///
    /// This does not preserve the order of items but moves at most one item. Returns a cursor at
    /// the position of the removed item, which now holds the former last item. If the removed item
    /// was the last one, returns the end. Invalidates cursors at or after the removed position.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`][crate::Fault] if the cursor is at the end, invalidated or from a
    /// different collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let mut items = PagedVec::<char, 2>::from(['a', 'b', 'c', 'd']);
    ///
    /// let next = items.erase_unsorted(items.cursor(0));
    ///
    /// assert_eq!(*items.at_cursor(next), 'd');
    /// assert_eq!(items, PagedVec::<char, 2>::from(['d', 'b', 'c']));
    /// ```
    pub fn erase_unsorted(&mut self, cursor: Cursor) -> Cursor {
        let index = self.verify_dereferenceable(cursor);

        drop(self.swap_remove_at(index));

        self.cursor_at(index)
    }

    /// Removes and returns the item at `index`, shifting all later items one position towards
    /// the front.
    ///
    /// Invalidates cursors at or after `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> T {
        assert!(
            index < self.len,
            "removal index (is {index}) should be < len (is {})",
            self.len
        );

        self.remove_at(index)
    }

    /// Removes and returns the item at `index`, moving the last item into its place.
    ///
    /// Invalidates cursors at or after `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn swap_remove(&mut self, index: usize) -> T {
        assert!(
            index < self.len,
            "swap_remove index (is {index}) should be < len (is {})",
            self.len
        );

        self.swap_remove_at(index)
    }

    /// Requires `index < len`.
    fn remove_at(&mut self, index: usize) -> T {
        debug_assert!(index < self.len);

        // SAFETY: The index is within the initialized prefix. The slot is overwritten or dropped
        // from the length below without being dropped in place.
        let removed = unsafe { self.table.slot(index).read() };

        // Cannot overflow because index < len.
        let tail_start = index.wrapping_add(1);
        let tail_len = self.len.wrapping_sub(tail_start);

        // SAFETY: The tail holds live items and the slot at `index` is now vacant.
        unsafe {
            self.table.shift_down(tail_start, index, tail_len);
        }

        self.len = self.len.wrapping_sub(1);
        self.registry.invalidate_from(index);

        removed
    }

    /// Requires `index < len`.
    fn swap_remove_at(&mut self, index: usize) -> T {
        debug_assert!(index < self.len);

        // Cannot underflow because index < len.
        let last_index = self.len.wrapping_sub(1);

        let slot = self.table.slot(index);

        // SAFETY: Both slots hold live items. The last one is moved into the vacated slot and is
        // no longer counted in the length, so it will not be read or dropped again.
        let removed = unsafe {
            if index == last_index {
                slot.read()
            } else {
                mem::replace(&mut *slot.as_ptr(), self.table.slot(last_index).read())
            }
        };

        self.len = last_index;
        self.registry.invalidate_from(index);

        removed
    }
}
