use std::alloc::Layout;

use thiserror::Error;

/// Errors that can be reported by fallible [`PagedVec`][crate::PagedVec] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The caller asked for an item at a position that does not hold an item.
    #[error("index {index} is out of range for a paged vector of length {len}")]
    IndexOutOfRange {
        /// The position the caller asked for.
        index: usize,

        /// The number of items in the collection at the time of the request.
        len: usize,
    },

    /// The requested capacity cannot be represented, either because computing it overflows
    /// or because the page table would exceed the maximum size of an allocation.
    #[error("requested capacity exceeds the maximum capacity of a paged vector")]
    CapacityOverflow,

    /// The page allocator failed to provide memory for a page or for the page table.
    #[error("page allocator failed to allocate {} bytes aligned to {}", layout.size(), layout.align())]
    AllocationFailed {
        /// The layout of the allocation that failed.
        layout: Layout,
    },
}

/// A specialized `Result` type for paged vector operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn index_out_of_range_mentions_index_and_len() {
        let error = Error::IndexOutOfRange { index: 7, len: 3 };

        let message = error.to_string();
        assert!(message.contains('7'));
        assert!(message.contains('3'));
    }

    #[test]
    fn allocation_failed_mentions_layout() {
        let layout = Layout::from_size_align(4096, 64).unwrap();
        let error = Error::AllocationFailed { layout };

        let message = error.to_string();
        assert!(message.contains("4096"));
        assert!(message.contains("64"));
    }

    #[test]
    fn capacity_overflow_is_error() {
        let result: Result<()> = Err(Error::CapacityOverflow);
        assert!(matches!(result, Err(Error::CapacityOverflow)));
    }
}
