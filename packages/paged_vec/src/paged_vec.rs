use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};
use std::{fmt, mem};

use bytemuck::Zeroable;

use crate::{
    CursorRegistry, DEFAULT_FAULT_HANDLER, Error, Fault, FaultHandler, GlobalPageAllocator,
    PageAllocator, PageTable, PagedVecBuilder, Result, pages_for_len,
};

/// A growable array that stores its items in fixed-size pages instead of one contiguous buffer.
///
/// Each page holds `PAGE_SIZE` items and is allocated separately. Growing the collection
/// allocates new pages and never moves existing ones, so:
///
/// - Items have stable addresses for as long as they are in the collection, even across growth.
/// - There is never a large reallocation and copy when the collection grows.
/// - Memory can be released page by page via [`shrink_to_fit()`](Self::shrink_to_fit).
///
/// Access by index translates the index into a page and an offset within the page. For
/// power-of-two page sizes (including the default of 1024), this is a shift and a mask.
///
/// # Cursors
///
/// Borrowing iterators ([`iter()`](Self::iter), [`iter_mut()`](Self::iter_mut)) hold a borrow of
/// the collection, so they cannot observe a mutation. For algorithms that need to hold on to a
/// position across mutations, the collection hands out [`Cursor`][crate::Cursor]s instead. A cursor
/// is a detached position that is validated whenever it is used.
///
/// Mutations that remove items invalidate cursors at or after the first affected position. In
/// debug builds (or with the `cursor-debug` feature), using an invalidated cursor, a cursor from
/// another collection or an unbound cursor is detected and reported to the
/// [fault handler][crate::FaultHandler]. Range checks are performed in all builds.
///
/// # Examples
///
/// ```
/// use paged_vec::PagedVec;
///
/// let mut items: PagedVec<u32, 4> = PagedVec::new();
///
/// for value in 0..10 {
///     items.push(value);
/// }
///
/// assert_eq!(items.len(), 10);
/// assert_eq!(items.page_count(), 3);
/// assert_eq!(items[7], 7);
///
/// // The address of an item does not change when the collection grows.
/// let first: *const u32 = &items[0];
/// items.reserve(1000);
/// assert!(std::ptr::eq(first, &items[0]));
/// ```
///
/// # Thread safety
///
/// The collection is [`Send`] if `T` and the allocator are [`Send`], and [`Sync`] if `T` and the
/// allocator are [`Sync`]. It performs no internal synchronization.
pub struct PagedVec<T, const PAGE_SIZE: usize = 1024, A: PageAllocator = GlobalPageAllocator> {
    /// Owns the pages and the allocator. Knows nothing about which slots are initialized.
    pub(crate) table: PageTable<T, PAGE_SIZE, A>,

    /// Number of initialized items. They always occupy positions `[0, len)`.
    pub(crate) len: usize,

    pub(crate) registry: CursorRegistry,

    pub(crate) fault_handler: &'static dyn FaultHandler,
}

impl<T, const PAGE_SIZE: usize> PagedVec<T, PAGE_SIZE, GlobalPageAllocator> {
    /// Creates an empty collection that uses the global allocator.
    ///
    /// No memory is allocated until the first item is added.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let items: PagedVec<String> = PagedVec::new();
    ///
    /// assert!(items.is_empty());
    /// assert_eq!(items.capacity(), 0);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring a collection.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::{PagedVec, UnwindWithFault};
    ///
    /// let items = PagedVec::<u64, 256>::builder()
    ///     .capacity(1000)
    ///     .fault_handler(&UnwindWithFault)
    ///     .build();
    ///
    /// assert_eq!(items.capacity(), 1024);
    /// ```
    pub fn builder() -> PagedVecBuilder<T, PAGE_SIZE, GlobalPageAllocator> {
        PagedVecBuilder::new()
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PagedVec<T, PAGE_SIZE, A> {
    #[must_use]
    pub(crate) fn new_inner(
        allocator: A,
        fault_handler: &'static dyn FaultHandler,
        capacity: usize,
    ) -> Self {
        const { assert!(PAGE_SIZE > 0, "PagedVec must have a non-zero page size") };
        assert!(size_of::<T>() > 0, "PagedVec must have non-zero item size");

        let mut table = PageTable::new(allocator);
        table.reserve(capacity);

        Self {
            table,
            len: 0,
            registry: CursorRegistry::new(),
            fault_handler,
        }
    }

    /// Creates a collection of `len` default-valued items.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let items = PagedVec::<String, 8>::with_len_default(20);
    ///
    /// assert_eq!(items.len(), 20);
    /// assert!(items.iter().all(String::is_empty));
    /// ```
    #[must_use]
    pub fn with_len_default(len: usize) -> Self
    where
        T: Default,
        A: Default,
    {
        let mut result = Self::new_inner(A::default(), &DEFAULT_FAULT_HANDLER, len);
        result.resize_with(len, T::default);
        result
    }

    /// Creates a collection of `len` clones of `value`.
    #[must_use]
    pub fn from_elem(value: T, len: usize) -> Self
    where
        T: Clone,
        A: Default,
    {
        let mut result = Self::new_inner(A::default(), &DEFAULT_FAULT_HANDLER, len);
        result.resize(len, value);
        result
    }

    /// The number of items in the collection.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the collection holds no items.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of items the collection can hold without allocating another page.
    ///
    /// This is always a multiple of the page size.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// The largest number of items the collection can ever hold.
    #[must_use]
    #[inline]
    pub fn max_len(&self) -> usize {
        PageTable::<T, PAGE_SIZE, A>::max_len()
    }

    /// The number of items stored in each page.
    #[must_use]
    #[inline]
    pub const fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// The number of pages currently allocated.
    #[must_use]
    #[inline]
    pub fn page_count(&self) -> usize {
        self.table.page_count()
    }

    /// The number of pages the page table can refer to before the table itself needs to grow.
    ///
    /// The page table grows by a factor of 1.5, independently of the pages themselves.
    #[must_use]
    #[inline]
    pub fn page_table_capacity(&self) -> usize {
        self.table.page_capacity()
    }

    /// The allocator that provides memory for the pages and the page table.
    #[must_use]
    #[inline]
    pub fn allocator(&self) -> &A {
        self.table.allocator()
    }

    /// Returns a reference to the item at `index`, or `None` if out of bounds.
    #[must_use]
    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }

        // SAFETY: The index is within the initialized prefix.
        Some(unsafe { self.get_unchecked(index) })
    }

    /// Returns an exclusive reference to the item at `index`, or `None` if out of bounds.
    #[must_use]
    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }

        // SAFETY: The index is within the initialized prefix.
        Some(unsafe { self.get_unchecked_mut(index) })
    }

    /// Returns a reference to the item at `index`, or an error if out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::{Error, PagedVec};
    ///
    /// let items = PagedVec::<u8>::from([1, 2, 3]);
    ///
    /// assert_eq!(*items.at(2).unwrap(), 3);
    /// assert!(matches!(
    ///     items.at(3),
    ///     Err(Error::IndexOutOfRange { index: 3, len: 3 })
    /// ));
    /// ```
    #[inline]
    pub fn at(&self, index: usize) -> Result<&T> {
        let len = self.len;

        self.get(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Returns an exclusive reference to the item at `index`, or an error if out of bounds.
    #[inline]
    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.len;

        self.get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Returns a reference to the item at `index` without bounds checking.
    ///
    /// # Safety
    ///
    /// The index must be less than [`len()`](Self::len).
    #[must_use]
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        debug_assert!(index < self.len);

        // SAFETY: Forwarding guarantee from the caller that the slot is initialized.
        unsafe { self.table.slot(index).as_ref() }
    }

    /// Returns an exclusive reference to the item at `index` without bounds checking.
    ///
    /// # Safety
    ///
    /// The index must be less than [`len()`](Self::len).
    #[must_use]
    #[inline]
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index < self.len);

        // SAFETY: Forwarding guarantee from the caller that the slot is initialized. We hold
        // `&mut self`, so no other reference to the item exists.
        unsafe { self.table.slot(index).as_mut() }
    }

    /// The first item, if any.
    #[must_use]
    #[inline]
    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    /// An exclusive reference to the first item, if any.
    #[must_use]
    #[inline]
    pub fn first_mut(&mut self) -> Option<&mut T> {
        self.get_mut(0)
    }

    /// The last item, if any.
    #[must_use]
    #[inline]
    pub fn last(&self) -> Option<&T> {
        self.get(self.len.checked_sub(1)?)
    }

    /// An exclusive reference to the last item, if any.
    #[must_use]
    #[inline]
    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.get_mut(self.len.checked_sub(1)?)
    }

    /// Appends an item to the end of the collection.
    ///
    /// Allocates a new page if the last page is full. Existing items are never moved and no
    /// cursors are invalidated.
    #[inline]
    pub fn push(&mut self, value: T) {
        self.push_mut(value);
    }

    /// Appends an item to the end of the collection and returns an exclusive reference to it.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let mut items: PagedVec<Vec<u8>> = PagedVec::new();
    ///
    /// let added = items.push_mut(Vec::new());
    /// added.push(42);
    ///
    /// assert_eq!(items[0], vec![42]);
    /// ```
    #[inline]
    pub fn push_mut(&mut self, value: T) -> &mut T {
        if self.len == self.table.capacity() {
            let capacity_needed = self
                .len
                .checked_add(1)
                .expect("length cannot exceed max_len(), which is far below usize::MAX");

            self.table.reserve(capacity_needed);
        }

        let mut slot = self.table.slot(self.len);

        // SAFETY: The slot is within capacity and just past the initialized prefix.
        unsafe {
            slot.write(value);
        }

        // Cannot overflow because the slot above was within capacity.
        self.len = self.len.wrapping_add(1);

        // SAFETY: We just initialized the slot and hold `&mut self`.
        unsafe { slot.as_mut() }
    }

    /// Removes the last item and returns it, or `None` if the collection is empty.
    ///
    /// Invalidates cursors at or after the position of the removed item.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let new_len = self.len.checked_sub(1)?;

        self.len = new_len;
        self.registry.invalidate_from(new_len);

        // SAFETY: The slot was the last initialized one and is no longer counted in the length,
        // so it will not be read or dropped again.
        Some(unsafe { self.table.slot(new_len).read() })
    }

    /// Ensures the collection can hold at least `capacity` items in total without allocating.
    ///
    /// Unlike [`Vec::reserve()`], the argument is the total capacity, not an additional amount.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`max_len()`](Self::max_len).
    pub fn reserve(&mut self, capacity: usize) {
        self.table.reserve(capacity);
    }

    /// Ensures the collection can hold at least `capacity` items in total, reporting failure
    /// instead of panicking.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::{Error, PagedVec};
    ///
    /// let mut items: PagedVec<u64> = PagedVec::new();
    ///
    /// assert!(items.try_reserve(5000).is_ok());
    /// assert!(matches!(
    ///     items.try_reserve(usize::MAX),
    ///     Err(Error::CapacityOverflow)
    /// ));
    /// ```
    pub fn try_reserve(&mut self, capacity: usize) -> Result<()> {
        self.table.try_reserve(capacity)
    }

    /// Releases every page that holds no items.
    ///
    /// The page table keeps its size. No items are moved and no cursors are invalidated.
    pub fn shrink_to_fit(&mut self) {
        self.table
            .release_pages_from(pages_for_len::<PAGE_SIZE>(self.len));
    }

    /// Shortens the collection to `len` items, dropping the rest.
    ///
    /// Does nothing if the collection is already that short. Invalidates cursors at or after
    /// `len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }

        let old_len = mem::replace(&mut self.len, len);
        self.registry.invalidate_from(len);

        // SAFETY: The range was initialized and is no longer counted in the length.
        unsafe {
            self.table.drop_range(len..old_len);
        }
    }

    /// Removes all items, keeping the allocated pages. Invalidates all cursors.
    pub fn clear(&mut self) {
        let old_len = mem::take(&mut self.len);
        self.registry.invalidate_all();

        // SAFETY: The range was initialized and is no longer counted in the length.
        unsafe {
            self.table.drop_range(0..old_len);
        }
    }

    /// Resizes the collection to `new_len` items, filling new slots with items returned by `f`.
    ///
    /// If `new_len` is less than the current length, this is [`truncate()`](Self::truncate).
    pub fn resize_with<F>(&mut self, new_len: usize, f: F)
    where
        F: FnMut() -> T,
    {
        if new_len <= self.len {
            self.truncate(new_len);
            return;
        }

        self.table.reserve(new_len);

        // SAFETY: The length is the initialized prefix and we just reserved enough capacity.
        unsafe {
            self.table.construct_with(&mut self.len, new_len, f);
        }
    }

    /// Resizes the collection to `new_len` items, filling new slots with clones of `value`.
    pub fn resize(&mut self, new_len: usize, value: T)
    where
        T: Clone,
    {
        self.resize_with(new_len, || value.clone());
    }

    /// Resizes the collection to `new_len` items, filling new slots with default values.
    pub fn resize_default(&mut self, new_len: usize)
    where
        T: Default,
    {
        self.resize_with(new_len, T::default);
    }

    /// Resizes the collection to `new_len` items, filling new slots with zero bytes.
    ///
    /// New slots are filled with one memory operation per page, without producing items one by
    /// one.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let mut items: PagedVec<u32, 16> = PagedVec::new();
    /// items.resize_zeroed(100);
    ///
    /// assert_eq!(items.len(), 100);
    /// assert!(items.iter().all(|value| *value == 0));
    /// ```
    pub fn resize_zeroed(&mut self, new_len: usize)
    where
        T: Zeroable,
    {
        if new_len <= self.len {
            self.truncate(new_len);
            return;
        }

        self.table.reserve(new_len);

        // SAFETY: The slots past the length are uninitialized and we just reserved enough
        // capacity. Zeroable items cannot panic during construction.
        unsafe {
            self.table.construct_zeroed(self.len, new_len);
        }

        self.len = new_len;
    }

    /// Replaces the contents of the collection with the items of `iter`.
    ///
    /// Invalidates all cursors. Allocated pages are reused.
    pub fn assign<I>(&mut self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.clear();
        self.extend(iter);
    }

    /// Replaces the contents of the collection with a copy of the items of `source`.
    ///
    /// Items are copied with one memory copy per page. Invalidates all cursors.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let source = PagedVec::<u16, 4>::from([1, 2, 3, 4, 5, 6]);
    /// let mut target = PagedVec::<u16, 4>::from([9]);
    ///
    /// target.copy_from(&source);
    ///
    /// assert_eq!(target, source);
    /// ```
    pub fn copy_from<B: PageAllocator>(&mut self, source: &PagedVec<T, PAGE_SIZE, B>)
    where
        T: Copy,
    {
        self.clear();
        self.table.reserve(source.len);

        // SAFETY: The source holds `source.len` items. We are empty and have enough capacity.
        unsafe {
            self.table.copy_from_table(&source.table, source.len);
        }

        self.len = source.len;
    }

    /// Moves all items into a new collection, leaving this one empty.
    ///
    /// The pages themselves are transferred, so items keep their addresses. The new collection
    /// has its own identity for cursor tracking. All cursors of this collection are invalidated.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::PagedVec;
    ///
    /// let mut source = PagedVec::<u32>::from([1, 2, 3]);
    /// let first: *const u32 = &source[0];
    ///
    /// let taken = source.take();
    ///
    /// assert!(source.is_empty());
    /// assert!(std::ptr::eq(first, &taken[0]));
    /// ```
    #[must_use]
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        let allocator = self.table.allocator().clone();
        let table = mem::replace(&mut self.table, PageTable::new(allocator));
        let len = mem::take(&mut self.len);

        self.registry.invalidate_all();

        Self {
            table,
            len,
            registry: CursorRegistry::new(),
            fault_handler: self.fault_handler,
        }
    }

    /// Drops all items of this collection and moves the items of `source` into it, leaving
    /// `source` empty.
    ///
    /// The pages of `source` are transferred along with its allocator, so items keep their
    /// addresses. All cursors of both collections are invalidated.
    pub fn move_from(&mut self, source: &mut Self) {
        self.clear();

        mem::swap(&mut self.table, &mut source.table);
        self.len = mem::take(&mut source.len);
        source.registry.invalidate_all();

        // Source now owns our old pages, which hold no items.
        source.table.release_pages_from(0);
    }

    /// Hands a fault to the fault handler, which never returns.
    #[cold]
    pub(crate) fn fault(&self, fault: Fault) -> ! {
        self.fault_handler.on_fault(fault)
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Drop for PagedVec<T, PAGE_SIZE, A> {
    fn drop(&mut self) {
        let len = mem::take(&mut self.len);

        // SAFETY: The range was initialized and is no longer counted in the length.
        unsafe {
            self.table.drop_range(0..len);
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator + Default> Default for PagedVec<T, PAGE_SIZE, A> {
    fn default() -> Self {
        Self::new_inner(A::default(), &DEFAULT_FAULT_HANDLER, 0)
    }
}

/// Clones item by item. For `Copy` items, [`PagedVec::copy_from()`] copies a whole page with one
/// memory copy instead.
impl<T: Clone, const PAGE_SIZE: usize, A: PageAllocator + Clone> Clone
    for PagedVec<T, PAGE_SIZE, A>
{
    fn clone(&self) -> Self {
        let mut result = Self::new_inner(self.table.allocator().clone(), self.fault_handler, self.len);

        // SAFETY: We hold `self.len` items and the new collection is empty with enough capacity.
        unsafe {
            result
                .table
                .clone_from_table(&mut result.len, &self.table, self.len);
        }

        result
    }

    fn clone_from(&mut self, source: &Self) {
        self.clear();
        self.table.reserve(source.len);

        // SAFETY: The source holds `source.len` items. We are empty and have enough capacity.
        unsafe {
            self.table
                .clone_from_table(&mut self.len, &source.table, source.len);
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Index<usize> for PagedVec<T, PAGE_SIZE, A> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        let len = self.len;

        self.get(index).unwrap_or_else(|| {
            panic!("index out of bounds: the len is {len} but the index is {index}")
        })
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> IndexMut<usize> for PagedVec<T, PAGE_SIZE, A> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut T {
        let len = self.len;

        self.get_mut(index).unwrap_or_else(|| {
            panic!("index out of bounds: the len is {len} but the index is {index}")
        })
    }
}

impl<T: fmt::Debug, const PAGE_SIZE: usize, A: PageAllocator> fmt::Debug
    for PagedVec<T, PAGE_SIZE, A>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, U, const PAGE_SIZE: usize, A, B> PartialEq<PagedVec<U, PAGE_SIZE, B>>
    for PagedVec<T, PAGE_SIZE, A>
where
    T: PartialEq<U>,
    A: PageAllocator,
    B: PageAllocator,
{
    fn eq(&self, other: &PagedVec<U, PAGE_SIZE, B>) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl<T: Eq, const PAGE_SIZE: usize, A: PageAllocator> Eq for PagedVec<T, PAGE_SIZE, A> {}

impl<T: Hash, const PAGE_SIZE: usize, A: PageAllocator> Hash for PagedVec<T, PAGE_SIZE, A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state);

        for item in self {
            item.hash(state);
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Extend<T> for PagedVec<T, PAGE_SIZE, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();

        let (lower_bound, _) = iter.size_hint();
        self.table.reserve(self.len.saturating_add(lower_bound));

        for item in iter {
            self.push(item);
        }
    }
}

impl<'a, T: Copy + 'a, const PAGE_SIZE: usize, A: PageAllocator> Extend<&'a T>
    for PagedVec<T, PAGE_SIZE, A>
{
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator + Default> FromIterator<T>
    for PagedVec<T, PAGE_SIZE, A>
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut result = Self::default();
        result.extend(iter);
        result
    }
}

impl<T, const N: usize, const PAGE_SIZE: usize, A: PageAllocator + Default> From<[T; N]>
    for PagedVec<T, PAGE_SIZE, A>
{
    fn from(items: [T; N]) -> Self {
        items.into_iter().collect()
    }
}

impl<T: Clone, const PAGE_SIZE: usize, A: PageAllocator + Default> From<&[T]>
    for PagedVec<T, PAGE_SIZE, A>
{
    fn from(items: &[T]) -> Self {
        items.iter().cloned().collect()
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator + Default> From<Vec<T>>
    for PagedVec<T, PAGE_SIZE, A>
{
    fn from(items: Vec<T>) -> Self {
        items.into_iter().collect()
    }
}
