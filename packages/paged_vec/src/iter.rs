use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::{fmt, slice};

use crate::{
    GlobalPageAllocator, PageAllocator, PageCoordinates, PageTable, PagedVec, Segments, segments,
};

/// Locates the run of slots in the page containing `index`, starting at `index` and ending at the
/// page boundary or at `end`, whichever comes first. Requires `index < end`.
fn page_run<T, const PAGE_SIZE: usize, A: PageAllocator>(
    table: &PageTable<T, PAGE_SIZE, A>,
    index: usize,
    end: usize,
) -> (NonNull<T>, usize) {
    let coordinates = PageCoordinates::from_position::<PAGE_SIZE>(index);

    // Cannot overflow because offset < PAGE_SIZE and index < end.
    let count = PAGE_SIZE
        .wrapping_sub(coordinates.offset())
        .min(end.wrapping_sub(index));

    let first = table
        .page(coordinates.page_index())
        .slot(coordinates.offset());

    (first, count)
}

/// Borrowing iterator over the items of a [`PagedVec`], returned by
/// [`PagedVec::iter()`].
///
/// The iterator keeps the remaining items of the current page as a slice, so stepping within a
/// page is a slice operation. The page is only looked up again when the cached run is exhausted.
pub struct Iter<'a, T, const PAGE_SIZE: usize = 1024, A: PageAllocator = GlobalPageAllocator> {
    table: &'a PageTable<T, PAGE_SIZE, A>,

    /// Logical position of the next item to be returned.
    index: usize,

    /// One past the last position to be returned.
    end: usize,

    /// Items of the current page from `index` onward.
    run: &'a [T],
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> Iter<'a, T, PAGE_SIZE, A> {
    pub(crate) fn new(table: &'a PageTable<T, PAGE_SIZE, A>, len: usize) -> Self {
        Self {
            table,
            index: 0,
            end: len,
            run: &[],
        }
    }

    /// The logical position of the next item the iterator returns.
    #[must_use]
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[cold]
    fn load_run(&mut self) {
        let (first, count) = page_run(self.table, self.index, self.end);

        // SAFETY: The caller checked that index < end, and end is the length of the collection,
        // so the run is within the initialized prefix. We hold a shared borrow of the collection
        // for 'a.
        self.run = unsafe { slice::from_raw_parts(first.as_ptr(), count) };
    }
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> Iterator for Iter<'a, T, PAGE_SIZE, A> {
    type Item = &'a T;

    #[inline]
    fn next(&mut self) -> Option<&'a T> {
        if self.run.is_empty() {
            if self.index >= self.end {
                return None;
            }

            self.load_run();
        }

        let (item, rest) = self.run.split_first()?;
        self.run = rest;

        // Cannot overflow because index < end.
        self.index = self.index.wrapping_add(1);

        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.wrapping_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> ExactSizeIterator for Iter<'_, T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> FusedIterator for Iter<'_, T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Clone for Iter<'_, T, PAGE_SIZE, A> {
    fn clone(&self) -> Self {
        Self {
            table: self.table,
            index: self.index,
            end: self.end,
            run: self.run,
        }
    }
}

/// Two iterators are equal if they iterate the same collection and are at the same position.
impl<T, const PAGE_SIZE: usize, A: PageAllocator> PartialEq for Iter<'_, T, PAGE_SIZE, A> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.table, other.table) && self.index == other.index
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Eq for Iter<'_, T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> fmt::Debug for Iter<'_, T, PAGE_SIZE, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter")
            .field("index", &self.index)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Borrowing iterator over exclusive references to the items of a [`PagedVec`], returned by
/// [`PagedVec::iter_mut()`].
///
/// Can be converted into an [`Iter`] at the same position, but not the other way around.
pub struct IterMut<'a, T, const PAGE_SIZE: usize = 1024, A: PageAllocator = GlobalPageAllocator>
{
    // Downgraded from an exclusive borrow of the collection for 'a. We only read page pointers
    // through this reference and never create references to items through it.
    table: &'a PageTable<T, PAGE_SIZE, A>,

    index: usize,
    end: usize,
    run: &'a mut [T],

    _items: PhantomData<&'a mut T>,
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> IterMut<'a, T, PAGE_SIZE, A> {
    pub(crate) fn new(table: &'a mut PageTable<T, PAGE_SIZE, A>, len: usize) -> Self {
        Self {
            table,
            index: 0,
            end: len,
            run: &mut [],
            _items: PhantomData,
        }
    }

    /// The logical position of the next item the iterator returns.
    #[must_use]
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[cold]
    fn load_run(&mut self) {
        let (first, count) = page_run(self.table, self.index, self.end);

        // SAFETY: The caller checked that index < end, and end is the length of the collection,
        // so the run is within the initialized prefix. We hold an exclusive borrow of the
        // collection for 'a and each position is handed out at most once.
        self.run = unsafe { slice::from_raw_parts_mut(first.as_ptr(), count) };
    }
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> Iterator for IterMut<'a, T, PAGE_SIZE, A> {
    type Item = &'a mut T;

    #[inline]
    fn next(&mut self) -> Option<&'a mut T> {
        if self.run.is_empty() {
            if self.index >= self.end {
                return None;
            }

            self.load_run();
        }

        let (item, rest) = mem::take(&mut self.run).split_first_mut()?;
        self.run = rest;

        // Cannot overflow because index < end.
        self.index = self.index.wrapping_add(1);

        Some(item)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.wrapping_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> ExactSizeIterator
    for IterMut<'_, T, PAGE_SIZE, A>
{
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> FusedIterator for IterMut<'_, T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PartialEq for IterMut<'_, T, PAGE_SIZE, A> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.table, other.table) && self.index == other.index
    }
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> From<IterMut<'a, T, PAGE_SIZE, A>>
    for Iter<'a, T, PAGE_SIZE, A>
{
    fn from(value: IterMut<'a, T, PAGE_SIZE, A>) -> Self {
        Self {
            table: value.table,
            index: value.index,
            end: value.end,
            run: value.run,
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> fmt::Debug for IterMut<'_, T, PAGE_SIZE, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterMut")
            .field("index", &self.index)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Owning iterator over the items of a [`PagedVec`], returned by its
/// [`IntoIterator`] implementation.
///
/// Items not consumed by the time the iterator is dropped are dropped along with it.
pub struct IntoIter<T, const PAGE_SIZE: usize = 1024, A: PageAllocator = GlobalPageAllocator> {
    table: PageTable<T, PAGE_SIZE, A>,

    /// Positions `[index, end)` hold items that have not been returned yet.
    index: usize,
    end: usize,
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Iterator for IntoIter<T, PAGE_SIZE, A> {
    type Item = T;

    #[inline]
    fn next(&mut self) -> Option<T> {
        if self.index >= self.end {
            return None;
        }

        let slot = self.table.slot(self.index);

        // Cannot overflow because index < end.
        self.index = self.index.wrapping_add(1);

        // SAFETY: The slot held a live item and is now outside [index, end), so it will not be
        // read or dropped again.
        Some(unsafe { slot.read() })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.wrapping_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> ExactSizeIterator for IntoIter<T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> FusedIterator for IntoIter<T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Drop for IntoIter<T, PAGE_SIZE, A> {
    fn drop(&mut self) {
        let remaining = self.index..self.end;
        self.index = self.end;

        // SAFETY: The range holds live items that are no longer tracked by the iterator.
        unsafe {
            self.table.drop_range(remaining);
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> fmt::Debug for IntoIter<T, PAGE_SIZE, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntoIter")
            .field("index", &self.index)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

/// Iterator over the items of a [`PagedVec`] as one slice per page, returned by
/// [`PagedVec::pages()`].
pub struct Pages<'a, T, const PAGE_SIZE: usize = 1024, A: PageAllocator = GlobalPageAllocator> {
    table: &'a PageTable<T, PAGE_SIZE, A>,
    segments: Segments<PAGE_SIZE>,
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> Iterator for Pages<'a, T, PAGE_SIZE, A> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<&'a [T]> {
        let segment = self.segments.next()?;

        // SAFETY: Segments only cover the initialized prefix and we hold a shared borrow of the
        // collection for 'a.
        Some(unsafe { self.table.page(segment.page_index).items(segment.offsets) })
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> FusedIterator for Pages<'_, T, PAGE_SIZE, A> {}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> fmt::Debug for Pages<'_, T, PAGE_SIZE, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pages")
            .field("segments", &self.segments)
            .finish_non_exhaustive()
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PagedVec<T, PAGE_SIZE, A> {
    /// Returns an iterator over references to the items, in order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, T, PAGE_SIZE, A> {
        Iter::new(&self.table, self.len)
    }

    /// Returns an iterator over exclusive references to the items, in order.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let mut items = PagedVec::<u32, 2>::from([1, 2, 3]);
    ///
    /// for item in items.iter_mut() {
    ///     *item *= 10;
    /// }
    ///
    /// assert_eq!(items, PagedVec::<u32, 2>::from([10, 20, 30]));
    /// ```
    #[inline]
    pub fn iter_mut(&mut self) -> IterMut<'_, T, PAGE_SIZE, A> {
        IterMut::new(&mut self.table, self.len)
    }

    /// Returns an iterator over the items as one slice per page, in order.
    ///
    /// Every slice except the last one holds exactly `PAGE_SIZE` items.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let items: PagedVec<u32, 4> = (0..10).collect();
    ///
    /// let lengths: Vec<usize> = items.pages().map(<[u32]>::len).collect();
    /// assert_eq!(lengths, vec![4, 4, 2]);
    /// ```
    #[inline]
    pub fn pages(&self) -> Pages<'_, T, PAGE_SIZE, A> {
        Pages {
            table: &self.table,
            segments: segments::<PAGE_SIZE>(0..self.len),
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> IntoIterator for PagedVec<T, PAGE_SIZE, A> {
    type Item = T;
    type IntoIter = IntoIter<T, PAGE_SIZE, A>;

    fn into_iter(self) -> Self::IntoIter {
        let mut this = ManuallyDrop::new(self);
        let end = mem::take(&mut this.len);

        // SAFETY: `this` is never used or dropped again, so each field is moved out exactly once.
        let (table, registry) = unsafe { (ptr::read(&this.table), ptr::read(&this.registry)) };
        drop(registry);

        IntoIter {
            table,
            index: 0,
            end,
        }
    }
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> IntoIterator for &'a PagedVec<T, PAGE_SIZE, A> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T, PAGE_SIZE, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, const PAGE_SIZE: usize, A: PageAllocator> IntoIterator
    for &'a mut PagedVec<T, PAGE_SIZE, A>
{
    type Item = &'a mut T;
    type IntoIter = IterMut<'a, T, PAGE_SIZE, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Iter<'static, u32>: Send, Sync, Clone, ExactSizeIterator, FusedIterator);
    assert_impl_all!(IterMut<'static, u32>: Send, Sync, ExactSizeIterator, FusedIterator);
    assert_impl_all!(IntoIter<String>: Send, Sync, ExactSizeIterator, FusedIterator);

    #[test]
    fn iter_visits_every_item_in_order() {
        let items: PagedVec<u32, 3> = (0..10).collect();

        assert_eq!(items.iter().copied().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn iter_of_empty() {
        let items: PagedVec<u32, 3> = PagedVec::new();

        assert_eq!(items.iter().next(), None);
        assert_eq!(items.iter().len(), 0);
    }

    #[test]
    fn iter_reports_exact_size() {
        let items: PagedVec<u32, 4> = (0..10).collect();
        let mut iter = items.iter();

        assert_eq!(iter.len(), 10);
        iter.nth(4);
        assert_eq!(iter.len(), 5);
        assert_eq!(iter.index(), 5);
    }

    #[test]
    fn iter_is_fused() {
        let items = PagedVec::<u32, 2>::from([1]);
        let mut iter = items.iter();

        assert_eq!(iter.next(), Some(&1));
        assert_eq!(iter.next(), None);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn iterators_compare_by_collection_and_position() {
        let items: PagedVec<u32, 4> = (0..10).collect();
        let other: PagedVec<u32, 4> = (0..10).collect();

        let mut first = items.iter();
        let second = items.iter();
        assert!(first == second);

        first.next();
        assert!(first != second);

        assert!(items.iter() != other.iter());
    }

    #[test]
    fn iter_mut_modifies_across_pages() {
        let mut items: PagedVec<u32, 3> = (0..10).collect();

        for item in &mut items {
            *item += 100;
        }

        assert_eq!(items.iter().copied().collect::<Vec<_>>(), (100..110).collect::<Vec<_>>());
    }

    #[test]
    fn iter_mut_converts_to_iter() {
        let mut items: PagedVec<u32, 3> = (0..10).collect();

        let mut iter_mut = items.iter_mut();
        iter_mut.nth(3);

        let iter: Iter<'_, u32, 3> = iter_mut.into();
        assert_eq!(iter.index(), 4);
        assert_eq!(iter.copied().collect::<Vec<_>>(), (4..10).collect::<Vec<_>>());
    }

    #[test]
    fn into_iter_yields_owned_items() {
        let items = PagedVec::<String, 2>::from(["a".to_string(), "b".to_string(), "c".to_string()]);

        let collected: Vec<String> = items.into_iter().collect();

        assert_eq!(collected, vec!["a", "b", "c"]);
    }

    #[test]
    fn into_iter_drops_unconsumed_items() {
        #[derive(Debug)]
        struct Counted(Rc<Cell<usize>>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut items: PagedVec<Counted, 4> = PagedVec::new();

        for _ in 0..10 {
            items.push(Counted(Rc::clone(&drops)));
        }

        let mut iter = items.into_iter();
        let first = iter.next();
        let second = iter.next();
        assert_eq!(drops.get(), 0);

        drop(iter);
        assert_eq!(drops.get(), 8);

        drop(first);
        drop(second);
        assert_eq!(drops.get(), 10);
    }

    #[test]
    fn pages_yields_live_slices() {
        let items: PagedVec<u32, 4> = (0..9).collect();

        let pages: Vec<&[u32]> = items.pages().collect();

        assert_eq!(pages, vec![&[0, 1, 2, 3][..], &[4, 5, 6, 7][..], &[8][..]]);
    }

    #[test]
    fn pages_of_empty() {
        let mut items: PagedVec<u32, 4> = (0..9).collect();
        items.clear();

        assert_eq!(items.pages().count(), 0);
    }
}
