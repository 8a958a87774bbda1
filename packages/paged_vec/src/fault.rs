use std::fmt::Debug;
use std::panic;
use std::process;

use thiserror::Error;
use tracing::error;

/// A misuse of a [`Cursor`][crate::Cursor] detected by a [`PagedVec`][crate::PagedVec].
///
/// Faults are not recoverable conditions. They indicate a bug in the calling code. When a fault
/// is detected, the collection hands it to its [`FaultHandler`], which never returns.
///
/// Identity and staleness checks ([`Fault::Invalidated`], [`Fault::CrossContainer`]) are only
/// performed when cursor tracking is enabled (debug builds or the `cursor-debug` feature).
/// Range checks are always performed because memory safety depends on them.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Fault {
    /// The cursor was invalidated by a mutation of the collection after it was created,
    /// or it was never associated with a collection to begin with.
    #[error("cursor has been invalidated or was never bound to a paged vector")]
    Invalidated,

    /// The cursor points past the last item that the operation may access.
    #[error("cursor at index {index} is out of range for a paged vector of length {len}")]
    OutOfRange {
        /// The index the cursor points to.
        index: usize,

        /// The length of the collection when the cursor was used.
        len: usize,
    },

    /// The cursor was created by a different collection than the one it was used with.
    #[error("cursor belongs to a different paged vector")]
    CrossContainer,

    /// A cursor range was used whose start comes after its end.
    #[error("cursor range is malformed: first index {first} comes after last index {last}")]
    InvalidRange {
        /// Index of the first cursor of the range.
        first: usize,

        /// Index of the last cursor of the range.
        last: usize,
    },
}

/// Receives faults detected by a [`PagedVec`][crate::PagedVec]. A handler never returns.
///
/// The collection holds a `&'static` reference to its handler, configured via
/// [`PagedVecBuilder::fault_handler()`][crate::PagedVecBuilder::fault_handler].
///
/// # Examples
///
/// ```
/// use paged_vec::{Fault, FaultHandler, PagedVec};
///
/// #[derive(Debug)]
/// struct LoudHandler;
///
/// impl FaultHandler for LoudHandler {
///     fn on_fault(&self, fault: Fault) -> ! {
///         panic!("LOUD: {fault}");
///     }
/// }
///
/// static LOUD: LoudHandler = LoudHandler;
///
/// let items = PagedVec::<u32>::builder().fault_handler(&LOUD).build();
/// assert!(items.is_empty());
/// ```
pub trait FaultHandler: Debug + Sync {
    /// Handles a fault. Implementations must diverge, typically by panicking or aborting.
    fn on_fault(&self, fault: Fault) -> !;
}

/// Panics with the fault's message. This is the default handler.
#[derive(Clone, Copy, Debug, Default)]
pub struct PanicOnFault;

impl FaultHandler for PanicOnFault {
    #[cfg_attr(test, mutants::skip)] // Diverges either way.
    fn on_fault(&self, fault: Fault) -> ! {
        panic!("paged vector fault: {fault}");
    }
}

/// Unwinds with the [`Fault`] itself as the panic payload.
///
/// This allows test code to catch the unwind via [`std::panic::catch_unwind`] and inspect
/// exactly which fault was detected by downcasting the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnwindWithFault;

impl FaultHandler for UnwindWithFault {
    fn on_fault(&self, fault: Fault) -> ! {
        panic::panic_any(fault);
    }
}

/// Logs the fault and aborts the process without unwinding.
#[derive(Clone, Copy, Debug, Default)]
pub struct AbortOnFault;

impl FaultHandler for AbortOnFault {
    #[cfg_attr(test, mutants::skip)] // Cannot be tested in-process.
    fn on_fault(&self, fault: Fault) -> ! {
        error!(%fault, "aborting due to paged vector fault");
        process::abort();
    }
}

pub(crate) static DEFAULT_FAULT_HANDLER: PanicOnFault = PanicOnFault;
