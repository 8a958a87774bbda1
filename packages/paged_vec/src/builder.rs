use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;

use crate::{DEFAULT_FAULT_HANDLER, FaultHandler, GlobalPageAllocator, PageAllocator, PagedVec};

/// Builder for creating an instance of [`PagedVec`].
///
/// All settings are optional. By default, the collection uses the global allocator, reports
/// faults by panicking and starts without any allocated pages.
///
/// # Examples
///
/// ```
/// use paged_vec::{AbortOnFault, PagedVec};
///
/// let items = PagedVec::<u32, 64>::builder()
///     .capacity(100)
///     .fault_handler(&AbortOnFault)
///     .build();
///
/// assert_eq!(items.capacity(), 128);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing collection configuration to happen on different threads than where the collection is
/// used. However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[must_use]
pub struct PagedVecBuilder<T, const PAGE_SIZE: usize, A: PageAllocator = GlobalPageAllocator> {
    allocator: A,
    fault_handler: &'static dyn FaultHandler,
    capacity: usize,

    _items: PhantomData<fn() -> T>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl<T, const PAGE_SIZE: usize> PagedVecBuilder<T, PAGE_SIZE, GlobalPageAllocator> {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            allocator: GlobalPageAllocator,
            fault_handler: &DEFAULT_FAULT_HANDLER,
            capacity: 0,
            _items: PhantomData,
            _not_sync: PhantomData,
        }
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator> PagedVecBuilder<T, PAGE_SIZE, A> {
    /// Sets the allocator that provides memory for the pages and the page table.
    ///
    /// The collection takes ownership of the allocator.
    ///
    /// # Examples
    ///
    /// ```
    /// use paged_vec::{GlobalPageAllocator, PagedVec};
    ///
    /// let items = PagedVec::<u64>::builder()
    ///     .allocator(GlobalPageAllocator)
    ///     .build();
    /// ```
    #[inline]
    pub fn allocator<B: PageAllocator>(self, allocator: B) -> PagedVecBuilder<T, PAGE_SIZE, B> {
        PagedVecBuilder {
            allocator,
            fault_handler: self.fault_handler,
            capacity: self.capacity,
            _items: PhantomData,
            _not_sync: PhantomData,
        }
    }

    /// Sets the [fault handler][FaultHandler] that receives cursor misuse reports.
    ///
    /// The default is [`PanicOnFault`][crate::PanicOnFault].
    #[inline]
    pub fn fault_handler(mut self, handler: &'static dyn FaultHandler) -> Self {
        self.fault_handler = handler;
        self
    }

    /// Allocates pages for at least `capacity` items when the collection is built.
    #[inline]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the collection with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type or if the requested capacity exceeds the maximum
    /// capacity of the collection.
    #[must_use]
    #[inline]
    pub fn build(self) -> PagedVec<T, PAGE_SIZE, A> {
        PagedVec::new_inner(self.allocator, self.fault_handler, self.capacity)
    }
}

impl<T, const PAGE_SIZE: usize, A: PageAllocator + fmt::Debug> fmt::Debug
    for PagedVecBuilder<T, PAGE_SIZE, A>
{
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedVecBuilder")
            .field("allocator", &self.allocator)
            .field("fault_handler", &self.fault_handler)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::alloc::Layout;
    use std::cell::Cell;
    use std::ptr::NonNull;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::UnwindWithFault;

    assert_impl_all!(PagedVecBuilder<u32, 16>: Send);
    assert_not_impl_any!(PagedVecBuilder<u32, 16>: Sync);

    #[derive(Debug, Default)]
    struct CountingAllocator {
        allocations: Cell<usize>,
    }

    // SAFETY: Forwards to the global allocator.
    unsafe impl PageAllocator for CountingAllocator {
        fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
            self.allocations.set(self.allocations.get() + 1);
            GlobalPageAllocator.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            // SAFETY: Forwarding guarantees from the caller.
            unsafe {
                GlobalPageAllocator.deallocate(ptr, layout);
            }
        }
    }

    #[test]
    fn default_build_is_empty() {
        let items = PagedVec::<u32, 16>::builder().build();

        assert!(items.is_empty());
        assert_eq!(items.capacity(), 0);
    }

    #[test]
    fn capacity_preallocates_pages() {
        let items = PagedVec::<u32, 16>::builder().capacity(40).build();

        assert_eq!(items.page_count(), 3);
        assert_eq!(items.capacity(), 48);
    }

    #[test]
    fn allocator_is_used() {
        let items = PagedVec::<u32, 16>::builder()
            .capacity(40)
            .allocator(CountingAllocator::default())
            .build();

        // One page table plus three pages.
        assert_eq!(items.allocator().allocations.get(), 4);
    }

    #[test]
    fn settings_survive_allocator_change() {
        let items = PagedVec::<u32, 16>::builder()
            .fault_handler(&UnwindWithFault)
            .capacity(1)
            .allocator(CountingAllocator::default())
            .build();

        assert_eq!(items.capacity(), 16);
    }

    #[test]
    fn builder_is_debug() {
        let builder = PagedVec::<u32, 16>::builder().capacity(7);

        let text = format!("{builder:?}");

        assert!(text.contains("capacity: 7"));
    }
}
