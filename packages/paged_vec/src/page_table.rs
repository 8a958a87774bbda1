use std::alloc::{Layout, handle_alloc_error};
use std::fmt;
use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::{Error, Page, PageAllocator, PageCoordinates, Result, pages_for_len};

/// Number of page table entries held back from the theoretical maximum, leaving headroom for
/// allocator bookkeeping.
const SAFETY_MARGIN: usize = 16;

/// The largest size of any single allocation, equal to `isize::MAX`.
const MAX_ALLOCATION_SIZE: usize = usize::MAX >> 1;

/// The largest number of pages a page table can ever refer to.
///
/// Rust allocations are limited to `isize::MAX` bytes, so this is the number of page pointers
/// that fit in such an allocation, minus a small safety margin.
#[expect(
    clippy::integer_division,
    reason = "we want the number of whole pointers that fit"
)]
pub(crate) const MAX_PAGE_CAPACITY: usize =
    (MAX_ALLOCATION_SIZE / size_of::<*const ()>()).saturating_sub(SAFETY_MARGIN);

/// Calculates the page table capacity after growing from `old_capacity` to hold at least
/// `pages_needed` pages.
///
/// The first growth allocates exactly what is needed. Later growth multiplies the capacity by 1.5,
/// raised to `pages_needed` if that is not enough, and clamped to `max_capacity`.
#[must_use]
pub(crate) fn grown_page_capacity(
    old_capacity: usize,
    pages_needed: usize,
    max_capacity: usize,
) -> usize {
    if old_capacity == 0 {
        return pages_needed.max(1);
    }

    #[expect(
        clippy::integer_division,
        reason = "the growth factor is 3/2 and we want the floor"
    )]
    let half = old_capacity / 2;

    if old_capacity > max_capacity.saturating_sub(half) {
        return max_capacity;
    }

    // Cannot overflow because we just checked that the sum stays within max_capacity.
    let grown = old_capacity.wrapping_add(half);

    grown.max(pages_needed)
}

/// The page table of a paged vector: an array of page pointers plus the allocator that owns the
/// memory of both the array and the pages.
///
/// Entries `[0, page_count)` always refer to allocated pages. Entries `[page_count,
/// page_capacity)` are always empty. The table does not know which slots hold live items and
/// never touches item values. Dropping the table releases memory only.
///
/// Growing the table moves page pointers into a new array. The pages themselves never move.
pub(crate) struct PageTable<T, const PAGE_SIZE: usize, A: PageAllocator> {
    /// The page pointer array. Dangling if `page_capacity` is zero.
    entries: NonNull<Option<Page<T, PAGE_SIZE>>>,

    /// Number of allocated pages, all at the front of the array.
    page_count: usize,

    /// Number of entries in the page pointer array.
    page_capacity: usize,

    allocator: A,
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PageTable<T, PAGE_SIZE, A> {
    /// Creates an empty page table. No memory is allocated until the first reservation.
    #[must_use]
    pub(crate) fn new(allocator: A) -> Self {
        Self {
            entries: NonNull::dangling(),
            page_count: 0,
            page_capacity: 0,
            allocator,
        }
    }

    #[must_use]
    #[inline]
    pub(crate) fn allocator(&self) -> &A {
        &self.allocator
    }

    #[must_use]
    #[inline]
    pub(crate) fn page_count(&self) -> usize {
        self.page_count
    }

    #[must_use]
    #[inline]
    pub(crate) fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// Number of item slots in all allocated pages.
    #[must_use]
    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.page_count.saturating_mul(PAGE_SIZE)
    }

    /// The largest number of items the table can ever hold.
    ///
    /// Limited both by the number of pages the table can refer to and by the items of all pages
    /// together fitting in `isize::MAX` bytes.
    #[must_use]
    #[inline]
    pub(crate) fn max_len() -> usize {
        let addressable = MAX_ALLOCATION_SIZE
            .checked_div(size_of::<T>())
            .unwrap_or(usize::MAX);

        MAX_PAGE_CAPACITY
            .saturating_mul(PAGE_SIZE)
            .min(addressable)
    }

    /// Returns the allocated page at `page_index`.
    ///
    /// # Panics
    ///
    /// Panics if there is no allocated page at that index.
    #[must_use]
    #[inline]
    pub(crate) fn page(&self, page_index: usize) -> &Page<T, PAGE_SIZE> {
        assert!(
            page_index < self.page_count,
            "page index {page_index} out of bounds for page table with {} pages",
            self.page_count
        );

        // SAFETY: The index is within page_count, which is within page_capacity, so the entry is
        // inside the array and initialized.
        let entry = unsafe { self.entries.add(page_index).as_ref() };

        entry
            .as_ref()
            .expect("entries below page_count always refer to allocated pages")
    }

    /// Returns a pointer to the item slot at a logical position.
    ///
    /// # Panics
    ///
    /// Panics if the position is not within an allocated page.
    #[must_use]
    #[inline]
    pub(crate) fn slot(&self, position: usize) -> NonNull<T> {
        let coordinates = PageCoordinates::from_position::<PAGE_SIZE>(position);

        self.page(coordinates.page_index())
            .slot(coordinates.offset())
    }

    /// Ensures that at least `capacity_needed` item slots are backed by allocated pages.
    ///
    /// # Panics
    ///
    /// Panics if the capacity exceeds [`max_len()`][Self::max_len]. Allocation failure is
    /// reported via [`handle_alloc_error()`].
    pub(crate) fn reserve(&mut self, capacity_needed: usize) {
        match self.try_reserve(capacity_needed) {
            Ok(()) => {}
            Err(Error::AllocationFailed { layout }) => handle_alloc_error(layout),
            Err(e) => panic!("{e}"),
        }
    }

    /// Ensures that at least `capacity_needed` item slots are backed by allocated pages,
    /// reporting failure instead of panicking.
    ///
    /// If allocation fails midway, the pages allocated so far remain part of the table.
    pub(crate) fn try_reserve(&mut self, capacity_needed: usize) -> Result<()> {
        if capacity_needed <= self.capacity() {
            return Ok(());
        }

        if capacity_needed > Self::max_len() {
            return Err(Error::CapacityOverflow);
        }

        let pages_needed = pages_for_len::<PAGE_SIZE>(capacity_needed);

        self.try_ensure_page_capacity(pages_needed)?;

        while self.page_count < pages_needed {
            self.allocate_page()?;
        }

        Ok(())
    }

    /// Grows the page pointer array so it has at least `pages_needed` entries.
    fn try_ensure_page_capacity(&mut self, pages_needed: usize) -> Result<()> {
        if pages_needed <= self.page_capacity {
            return Ok(());
        }

        if pages_needed > MAX_PAGE_CAPACITY {
            return Err(Error::CapacityOverflow);
        }

        let new_capacity = grown_page_capacity(self.page_capacity, pages_needed, MAX_PAGE_CAPACITY);

        let new_layout = Self::entries_layout(new_capacity)?;

        let new_entries = self
            .allocator
            .allocate(new_layout)
            .ok_or(Error::AllocationFailed { layout: new_layout })?
            .cast::<Option<Page<T, PAGE_SIZE>>>();

        // SAFETY: Both arrays hold at least page_count entries and are distinct allocations.
        // The old entries are moved bitwise; the old array is freed below without reading them.
        unsafe {
            new_entries.copy_from_nonoverlapping(self.entries, self.page_count);
        }

        for index in self.page_count..new_capacity {
            // SAFETY: The index is within the new array, which has new_capacity entries.
            unsafe {
                new_entries.add(index).write(None);
            }
        }

        let old_capacity = self.page_capacity;
        self.release_entries();

        self.entries = new_entries;
        self.page_capacity = new_capacity;

        trace!(
            old_capacity,
            new_capacity,
            page_count = self.page_count,
            "grew page table"
        );

        Ok(())
    }

    /// Allocates one page and appends it to the table.
    ///
    /// The page table must already have room for it.
    fn allocate_page(&mut self) -> Result<()> {
        assert!(
            self.page_count < self.page_capacity,
            "page index {} out of page table capacity {}",
            self.page_count,
            self.page_capacity
        );

        // SAFETY: page_count < page_capacity, so the entry is inside the array.
        let entry = unsafe { self.entries.add(self.page_count).as_mut() };

        assert!(
            entry.is_none(),
            "page {} is already allocated",
            self.page_count
        );

        *entry = Some(Page::allocate(&self.allocator)?);

        // Cannot overflow because it is less than page_capacity.
        self.page_count = self.page_count.wrapping_add(1);

        trace!(page_index = self.page_count.wrapping_sub(1), "allocated page");

        Ok(())
    }

    /// Releases every page beyond the first `pages_to_keep`.
    ///
    /// The page pointer array itself keeps its size. Items stored in the released pages are not
    /// dropped; the caller must have dropped them already.
    pub(crate) fn release_pages_from(&mut self, pages_to_keep: usize) {
        if pages_to_keep >= self.page_count {
            return;
        }

        let released = self.page_count.wrapping_sub(pages_to_keep);

        for index in pages_to_keep..self.page_count {
            // SAFETY: The index is within page_count, so the entry is inside the array.
            let entry = unsafe { self.entries.add(index).as_mut() };

            if let Some(page) = entry.take() {
                // SAFETY: The page was allocated from our allocator and the caller guarantees
                // that it no longer holds any live items.
                unsafe {
                    page.deallocate(&self.allocator);
                }
            }
        }

        self.page_count = pages_to_keep;

        debug!(
            released,
            remaining = self.page_count,
            page_capacity = self.page_capacity,
            "released pages"
        );
    }

    fn entries_layout(capacity: usize) -> Result<Layout> {
        Layout::array::<Option<Page<T, PAGE_SIZE>>>(capacity).map_err(|_e| Error::CapacityOverflow)
    }

    /// Frees the page pointer array without touching the pages it refers to.
    fn release_entries(&mut self) {
        if self.page_capacity == 0 {
            return;
        }

        let layout = Self::entries_layout(self.page_capacity)
            .expect("layout was valid when the array was allocated");

        // SAFETY: The array was allocated from our allocator with this exact layout.
        unsafe {
            self.allocator.deallocate(self.entries.cast(), layout);
        }

        self.entries = NonNull::dangling();
        self.page_capacity = 0;
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> Drop for PageTable<T, PAGE_SIZE, A> {
    fn drop(&mut self) {
        self.release_pages_from(0);
        self.release_entries();
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> fmt::Debug for PageTable<T, PAGE_SIZE, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTable")
            .field("page_count", &self.page_count)
            .field("page_capacity", &self.page_capacity)
            .finish_non_exhaustive()
    }
}

// SAFETY: The table exclusively owns its pages and page pointer array, like a Vec<T> would.
unsafe impl<T: Send, const PAGE_SIZE: usize, A: PageAllocator + Send> Send
    for PageTable<T, PAGE_SIZE, A>
{
}

// SAFETY: Shared access to the table only reads page pointers; item access through shared
// references requires T: Sync.
unsafe impl<T: Sync, const PAGE_SIZE: usize, A: PageAllocator + Sync> Sync
    for PageTable<T, PAGE_SIZE, A>
{
}
