use crate::{Fault, PageAllocator, PagedVec, Stamp};

/// A detached position in a [`PagedVec`].
///
/// Unlike a borrowing iterator, a cursor does not borrow the collection, so it can be held across
/// mutations. It is only a position: reading, writing and moving it all go through the
/// collection, which validates the cursor each time.
///
/// A cursor is invalidated when the collection removes items at or before its position, and by
/// operations that replace the entire contents of the collection. In debug builds (or with the
/// `cursor-debug` feature), using an invalidated cursor is a [`Fault`]. In other builds, it
/// silently refers to whatever item is now at its position, as long as that position is in range.
///
/// A default-constructed cursor is not bound to any collection.
///
/// # Examples
///
/// ```
/// use paged_vec::PagedVec;
///
/// let mut items = PagedVec::<u32, 4>::from([10, 20, 30]);
///
/// let mut cursor = items.begin();
/// items.advance(&mut cursor);
/// assert_eq!(*items.at_cursor(cursor), 20);
///
/// *items.at_cursor_mut(cursor) += 1;
/// assert_eq!(items[1], 21);
///
/// // Adding items does not invalidate cursors.
/// items.push(40);
/// assert_eq!(*items.at_cursor(cursor), 21);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Cursor {
    index: usize,
    stamp: Stamp,
}

impl Cursor {
    #[must_use]
    pub(crate) fn new(index: usize, stamp: Stamp) -> Self {
        Self { index, stamp }
    }

    /// The position in the collection that the cursor refers to.
    #[must_use]
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    #[inline]
    pub(crate) fn stamp(&self) -> Stamp {
        self.stamp
    }
}

/// Two cursors are equal if they refer to the same position of the same collection.
///
/// Collection identity is only tracked in debug builds (or with the `cursor-debug` feature).
/// In other builds, only positions are compared.
impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.stamp.same_owner(&other.stamp)
    }
}

impl Eq for Cursor {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PagedVec<T, PAGE_SIZE, A> {
    /// Returns a cursor at the first item (or at the end, if the collection is empty).
    #[must_use]
    #[inline]
    pub fn begin(&self) -> Cursor {
        self.cursor_at(0)
    }

    /// Returns a cursor one past the last item.
    #[must_use]
    #[inline]
    pub fn end(&self) -> Cursor {
        self.cursor_at(self.len)
    }

    /// Returns a cursor at `index`, which may be at most [`len()`](Self::len).
    ///
    /// # Panics
    ///
    /// Reports [`Fault::OutOfRange`] if `index` is greater than the length.
    #[must_use]
    pub fn cursor(&self, index: usize) -> Cursor {
        if index > self.len {
            self.fault(Fault::OutOfRange {
                index,
                len: self.len,
            });
        }

        self.cursor_at(index)
    }

    /// Returns a reference to the item at the cursor.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`] if the cursor is at the end, invalidated or from a different
    /// collection.
    #[must_use]
    #[inline]
    pub fn at_cursor(&self, cursor: Cursor) -> &T {
        let index = self.verify_dereferenceable(cursor);

        // SAFETY: Verified to be within the initialized prefix.
        unsafe { self.get_unchecked(index) }
    }

    /// Returns an exclusive reference to the item at the cursor.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`] if the cursor is at the end, invalidated or from a different
    /// collection.
    #[must_use]
    #[inline]
    pub fn at_cursor_mut(&mut self, cursor: Cursor) -> &mut T {
        let index = self.verify_dereferenceable(cursor);

        // SAFETY: Verified to be within the initialized prefix.
        unsafe { self.get_unchecked_mut(index) }
    }

    /// Moves the cursor to the next position.
    ///
    /// The cursor is revalidated at its new position, so only mutations that happen from now on
    /// can invalidate it.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`] if the cursor is already at the end, invalidated or from a different
    /// collection.
    #[inline]
    pub fn advance(&self, cursor: &mut Cursor) {
        self.advance_by(cursor, 1);
    }

    /// Moves the cursor forward by `steps` positions.
    ///
    /// # Panics
    ///
    /// Reports a [`Fault`] if the cursor would move past the end, or if it is invalidated or from
    /// a different collection.
    pub fn advance_by(&self, cursor: &mut Cursor, steps: usize) {
        let index = self.verify_position(*cursor);

        let new_index = match index.checked_add(steps) {
            Some(new_index) if new_index <= self.len => new_index,
            _ => self.fault(Fault::OutOfRange {
                index: index.saturating_add(steps),
                len: self.len,
            }),
        };

        *cursor = self.cursor_at(new_index);
    }

    /// Creates a freshly stamped cursor without range checks.
    #[must_use]
    #[inline]
    pub(crate) fn cursor_at(&self, index: usize) -> Cursor {
        Cursor::new(index, self.registry.stamp())
    }

    /// Checks that the cursor belongs to this collection, is still valid and refers to a position
    /// in `[0, len]`. Returns that position.
    #[inline]
    pub(crate) fn verify_position(&self, cursor: Cursor) -> usize {
        if let Err(fault) = self.registry.verify(cursor.stamp(), cursor.index()) {
            self.fault(fault);
        }

        if cursor.index() > self.len {
            self.fault(Fault::OutOfRange {
                index: cursor.index(),
                len: self.len,
            });
        }

        cursor.index()
    }

    /// Like [`verify_position()`](Self::verify_position) but additionally requires the cursor to
    /// refer to an item, not the end.
    #[inline]
    pub(crate) fn verify_dereferenceable(&self, cursor: Cursor) -> usize {
        let index = self.verify_position(cursor);

        if index == self.len {
            self.fault(Fault::OutOfRange {
                index,
                len: self.len,
            });
        }

        index
    }

    /// Checks a pair of cursors delimiting a range of items. Returns `(first, last)`.
    pub(crate) fn verify_range(&self, first: Cursor, last: Cursor) -> (usize, usize) {
        let first_index = self.verify_position(first);
        let last_index = self.verify_position(last);

        if first_index > last_index {
            self.fault(Fault::InvalidRange {
                first: first_index,
                last: last_index,
            });
        }

        (first_index, last_index)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::UnwindWithFault;

    assert_impl_all!(Cursor: Send, Sync, Copy, Default, Eq);

    fn fault_of(f: impl FnOnce()) -> Fault {
        let payload = catch_unwind(AssertUnwindSafe(f)).expect_err("operation was expected to fault");

        *payload
            .downcast::<Fault>()
            .expect("fault handler unwinds with the fault as payload")
    }

    fn sample() -> PagedVec<u32, 4> {
        let mut items = PagedVec::<u32, 4>::builder()
            .fault_handler(&UnwindWithFault)
            .build();

        items.extend(0..10);
        items
    }

    #[test]
    fn begin_and_end() {
        let items = sample();

        assert_eq!(items.begin().index(), 0);
        assert_eq!(items.end().index(), 10);
        assert_eq!(*items.at_cursor(items.begin()), 0);
    }

    #[test]
    fn cursor_at_index() {
        let items = sample();

        assert_eq!(*items.at_cursor(items.cursor(7)), 7);
        assert_eq!(items.cursor(10), items.end());
    }

    #[test]
    fn cursor_past_end_faults() {
        let items = sample();

        let fault = fault_of(|| {
            let _cursor = items.cursor(11);
        });

        assert_eq!(fault, Fault::OutOfRange { index: 11, len: 10 });
    }

    #[test]
    fn advance_walks_to_end() {
        let items = sample();
        let mut cursor = items.begin();
        let mut seen = Vec::new();

        while cursor != items.end() {
            seen.push(*items.at_cursor(cursor));
            items.advance(&mut cursor);
        }

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn advance_by_jumps() {
        let items = sample();
        let mut cursor = items.begin();

        items.advance_by(&mut cursor, 6);
        assert_eq!(*items.at_cursor(cursor), 6);

        items.advance(&mut cursor);
        assert_eq!(cursor.index(), 7);
    }

    #[test]
    fn advance_past_end_faults() {
        let items = sample();
        let mut cursor = items.end();

        let fault = fault_of(|| items.advance(&mut cursor));

        assert_eq!(fault, Fault::OutOfRange { index: 11, len: 10 });
    }

    #[test]
    fn dereferencing_end_faults() {
        let items = sample();

        let fault = fault_of(|| {
            let _item = items.at_cursor(items.end());
        });

        assert_eq!(fault, Fault::OutOfRange { index: 10, len: 10 });
    }

    #[test]
    fn at_cursor_mut_writes() {
        let mut items = sample();
        let cursor = items.cursor(3);

        *items.at_cursor_mut(cursor) = 300;

        assert_eq!(items[3], 300);
    }

    #[test]
    fn push_keeps_end_cursor_usable() {
        let mut items = sample();
        let end = items.end();

        items.push(10);

        assert_eq!(*items.at_cursor(end), 10);
    }

    #[test]
    fn cursors_compare_by_position() {
        let items = sample();

        assert_eq!(items.cursor(2), items.cursor(2));
        assert_ne!(items.cursor(2), items.cursor(3));
    }

    #[test]
    fn range_with_reversed_ends_faults() {
        let items = sample();

        let fault = fault_of(|| {
            let _range = items.verify_range(items.cursor(5), items.cursor(2));
        });

        assert_eq!(fault, Fault::InvalidRange { first: 5, last: 2 });
    }

    #[cfg(any(debug_assertions, feature = "cursor-debug"))]
    mod tracking {
        use super::*;

        #[test]
        fn unbound_cursor_faults() {
            let items = sample();

            let fault = fault_of(|| {
                let _item = items.at_cursor(Cursor::default());
            });

            assert_eq!(fault, Fault::Invalidated);
        }

        #[test]
        fn foreign_cursor_faults() {
            let items = sample();
            let other = sample();

            let fault = fault_of(|| {
                let _item = items.at_cursor(other.begin());
            });

            assert_eq!(fault, Fault::CrossContainer);
        }

        #[test]
        fn cursors_of_different_collections_differ() {
            let items = sample();
            let other = sample();

            assert_ne!(items.begin(), other.begin());
        }

        #[test]
        fn pop_invalidates_only_the_tail() {
            let mut items = sample();
            let early = items.cursor(3);
            let last = items.cursor(9);

            items.pop();

            assert_eq!(*items.at_cursor(early), 3);

            let fault = fault_of(|| {
                let _item = items.at_cursor(last);
            });
            assert_eq!(fault, Fault::Invalidated);
        }

        #[test]
        fn advanced_cursor_is_judged_by_new_position() {
            let mut items = sample();
            let mut cursor = items.cursor(2);

            items.truncate(5);

            // Position 2 survived the truncation.
            items.advance(&mut cursor);
            assert_eq!(cursor.index(), 3);

            items.truncate(4);

            let fault = fault_of(|| {
                let _item = items.at_cursor(cursor);
            });
            assert_eq!(fault, Fault::Invalidated);
        }

        #[test]
        fn growing_stack_keeps_tracking_bounded() {
            let mut items = sample();
            let early = items.cursor(2);

            for value in 0..10_000 {
                items.push(value);
                items.push(value);
                items.pop();
            }

            assert_eq!(items.len(), 10_010);
            assert!(items.registry.watermark_count() <= crate::MAX_WATERMARKS);

            // A cursor from before the discarded watermarks can no longer be vouched for.
            let fault = fault_of(|| {
                let _item = items.at_cursor(early);
            });
            assert_eq!(fault, Fault::Invalidated);

            // A fresh cursor below every recent pop is still valid.
            let fresh = items.cursor(2);
            items.push(1);
            items.pop();
            assert_eq!(*items.at_cursor(fresh), 2);
        }

        #[test]
        fn clear_invalidates_everything() {
            let mut items = sample();
            let begin = items.begin();

            items.clear();
            items.push(1);

            let fault = fault_of(|| {
                let _item = items.at_cursor(begin);
            });
            assert_eq!(fault, Fault::Invalidated);
        }
    }
}
