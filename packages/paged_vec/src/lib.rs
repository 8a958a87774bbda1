//! A growable array that stores its items in fixed-size pages, giving items stable addresses.
//!
//! This crate provides [`PagedVec`], a dynamic array that allocates memory in pages of
//! `PAGE_SIZE` items instead of one contiguous buffer. When the collection grows, it allocates
//! additional pages and leaves existing ones where they are.
//!
//! # Key Features
//!
//! - **Stable addresses**: Items never move when the collection grows
//! - **No large reallocations**: Growth allocates one page at a time, never copying items
//! - **Fast indexing**: Power-of-two page sizes translate an index with a shift and a mask
//! - **Page-batched bulk operations**: Filling, copying, dropping and erasing work on one page
//!   at a time, with single memory operations for `Copy` and `Zeroable` items
//! - **Pluggable allocator**: Pages and the page table come from a [`PageAllocator`]
//! - **Cursor checking**: Debug builds detect use of invalidated [`Cursor`]s and report them to a
//!   configurable [`FaultHandler`]
//!
//! # Examples
//!
//! ```rust
//! use paged_vec::PagedVec;
//!
//! let mut items: PagedVec<String, 256> = PagedVec::new();
//!
//! items.push("Hello".to_string());
//! items.push("World".to_string());
//!
//! let first: *const String = &items[0];
//!
//! // Growing far beyond the first page does not move existing items.
//! items.resize(10_000, String::new());
//! assert!(std::ptr::eq(first, &items[0]));
//!
//! assert_eq!(items.len(), 10_000);
//! assert_eq!(items.page_count(), 40);
//! ```
//!
//! ## Erasing with cursors
//!
//! ```rust
//! use paged_vec::PagedVec;
//!
//! let mut items: PagedVec<u32, 4> = (0..10).collect();
//!
//! // Remove every even number.
//! let mut cursor = items.begin();
//!
//! while cursor != items.end() {
//!     if *items.at_cursor(cursor) % 2 == 0 {
//!         cursor = items.erase(cursor);
//!     } else {
//!         items.advance(&mut cursor);
//!     }
//! }
//!
//! assert_eq!(items, PagedVec::<u32, 4>::from([1, 3, 5, 7, 9]));
//! ```
//!
//! # Cargo features
//!
//! - `cursor-debug`: Tracks cursor validity even in builds without debug assertions.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod alloc;
mod builder;
mod coordinates;
mod cursor;
mod erase;
mod error;
mod fault;
mod iter;
mod lifecycle;
mod page;
mod page_table;
mod paged_vec;
mod registry;

pub use alloc::*;
pub use builder::*;
pub(crate) use coordinates::*;
pub use cursor::*;
pub use error::Error;
pub(crate) use error::Result;
pub use fault::*;
pub use iter::*;
pub(crate) use lifecycle::*;
pub(crate) use page::*;
pub(crate) use page_table::*;
pub use paged_vec::*;
pub(crate) use registry::*;
