//! Detection of stale cursors.
//!
//! When cursor tracking is enabled (debug builds or the `cursor-debug` feature), every collection
//! has a unique identity and a generation counter. A cursor carries a [`Stamp`] recording the
//! collection and generation it was last validated at. Mutations that invalidate cursors bump the
//! generation and record a watermark: the lowest position whose cursors became invalid. Checking
//! a cursor means finding the oldest watermark newer than its stamp and comparing positions.
//!
//! Only the most recent watermarks are retained. Cursors stamped before the oldest retained one
//! are treated as invalidated, regardless of their position.
//!
//! When tracking is disabled, stamps are zero-sized and all registry operations compile to nothing.

#[cfg(any(debug_assertions, feature = "cursor-debug"))]
pub(crate) use tracking::*;
#[cfg(not(any(debug_assertions, feature = "cursor-debug")))]
pub(crate) use untracked::*;

#[cfg(any(debug_assertions, feature = "cursor-debug"))]
mod tracking {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::Fault;

    /// Watermarks retained before the oldest ones are folded into the generation floor.
    pub(crate) const MAX_WATERMARKS: usize = 64;

    // Zero is reserved for cursors that are not bound to any collection.
    static CONTAINER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

    /// Generates a unique collection ID.
    fn generate_container_id() -> u64 {
        CONTAINER_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    /// Identifies the collection and generation a cursor was last validated at.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct Stamp {
        container_id: u64,
        generation: u64,
    }

    impl Stamp {
        /// Whether two stamps were issued by the same collection.
        #[must_use]
        #[inline]
        pub(crate) fn same_owner(&self, other: &Self) -> bool {
            self.container_id == other.container_id
        }
    }

    /// Invalidation of all cursors at or after `from`, recorded at `generation`.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    struct Watermark {
        generation: u64,
        from: usize,
    }

    #[derive(Debug)]
    pub(crate) struct CursorRegistry {
        container_id: u64,
        generation: u64,

        /// Ordered by ascending generation and, at the same time, by strictly ascending `from`.
        /// A newer watermark with a lower or equal `from` makes older ones redundant, so those are
        /// removed when it is recorded.
        watermarks: VecDeque<Watermark>,

        /// Stamps older than this generation are invalid at every position. Raised when old
        /// watermarks are discarded to keep the queue bounded.
        floor_generation: u64,
    }

    impl CursorRegistry {
        #[must_use]
        pub(crate) fn new() -> Self {
            Self {
                container_id: generate_container_id(),
                generation: 0,
                watermarks: VecDeque::new(),
                floor_generation: 0,
            }
        }

        /// Issues a stamp for a cursor created or revalidated now.
        #[must_use]
        #[inline]
        pub(crate) fn stamp(&self) -> Stamp {
            Stamp {
                container_id: self.container_id,
                generation: self.generation,
            }
        }

        /// Invalidates every outstanding cursor whose index is at or after `from`.
        pub(crate) fn invalidate_from(&mut self, from: usize) {
            self.generation = self
                .generation
                .checked_add(1)
                .expect("generation counter cannot realistically overflow");

            while self.watermarks.back().is_some_and(|last| last.from >= from) {
                self.watermarks.pop_back();
            }

            self.watermarks.push_back(Watermark {
                generation: self.generation,
                from,
            });

            if self.watermarks.len() > MAX_WATERMARKS {
                let discarded = self
                    .watermarks
                    .pop_front()
                    .expect("queue holds more than MAX_WATERMARKS entries");

                // Stamps older than the discarded watermark may have been invalidated by it.
                self.floor_generation = discarded.generation;
            }
        }

        /// Invalidates every outstanding cursor.
        pub(crate) fn invalidate_all(&mut self) {
            self.invalidate_from(0);
        }

        /// Checks that a cursor was issued by this collection and has not been invalidated since.
        ///
        /// Range checks are the caller's responsibility.
        pub(crate) fn verify(&self, stamp: Stamp, index: usize) -> Result<(), Fault> {
            if stamp.container_id == 0 {
                return Err(Fault::Invalidated);
            }

            if stamp.container_id != self.container_id {
                return Err(Fault::CrossContainer);
            }

            if stamp.generation < self.floor_generation {
                return Err(Fault::Invalidated);
            }

            let first_newer = self
                .watermarks
                .partition_point(|watermark| watermark.generation <= stamp.generation);

            // Watermarks newer than the stamp have ascending `from`, so the first one has the
            // lowest position and decides the outcome.
            match self.watermarks.get(first_newer) {
                Some(watermark) if watermark.from <= index => Err(Fault::Invalidated),
                _ => Ok(()),
            }
        }

        /// Number of watermarks currently retained.
        #[cfg(test)]
        pub(crate) fn watermark_count(&self) -> usize {
            self.watermarks.len()
        }
    }

    impl Default for CursorRegistry {
        fn default() -> Self {
            Self::new()
        }
    }
}

#[cfg(not(any(debug_assertions, feature = "cursor-debug")))]
mod untracked {
    use crate::Fault;

    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub(crate) struct Stamp;

    impl Stamp {
        #[must_use]
        #[inline]
        pub(crate) fn same_owner(&self, _other: &Self) -> bool {
            true
        }
    }

    #[derive(Debug, Default)]
    pub(crate) struct CursorRegistry;

    impl CursorRegistry {
        #[must_use]
        #[inline]
        pub(crate) fn new() -> Self {
            Self
        }

        #[must_use]
        #[inline]
        pub(crate) fn stamp(&self) -> Stamp {
            Stamp
        }

        #[inline]
        pub(crate) fn invalidate_from(&mut self, _from: usize) {}

        #[inline]
        pub(crate) fn invalidate_all(&mut self) {}

        #[inline]
        #[expect(clippy::unused_self, reason = "mirrors the tracking registry")]
        pub(crate) fn verify(&self, _stamp: Stamp, _index: usize) -> Result<(), Fault> {
            Ok(())
        }
    }
}

#[cfg(all(test, any(debug_assertions, feature = "cursor-debug")))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Fault;

    #[test]
    fn fresh_stamp_is_valid() {
        let registry = CursorRegistry::new();
        let stamp = registry.stamp();

        assert_eq!(registry.verify(stamp, 0), Ok(()));
        assert_eq!(registry.verify(stamp, 1000), Ok(()));
    }

    #[test]
    fn default_stamp_is_unbound() {
        let registry = CursorRegistry::new();

        assert_eq!(registry.verify(Stamp::default(), 0), Err(Fault::Invalidated));
    }

    #[test]
    fn foreign_stamp_is_rejected() {
        let first = CursorRegistry::new();
        let second = CursorRegistry::new();

        assert_eq!(second.verify(first.stamp(), 0), Err(Fault::CrossContainer));
        assert!(!first.stamp().same_owner(&second.stamp()));
    }

    #[test]
    fn invalidate_from_only_hits_later_positions() {
        let mut registry = CursorRegistry::new();
        let stamp = registry.stamp();

        registry.invalidate_from(5);

        assert_eq!(registry.verify(stamp, 4), Ok(()));
        assert_eq!(registry.verify(stamp, 5), Err(Fault::Invalidated));
        assert_eq!(registry.verify(stamp, 6), Err(Fault::Invalidated));
    }

    #[test]
    fn restamped_cursor_survives_older_invalidation() {
        let mut registry = CursorRegistry::new();

        registry.invalidate_from(2);
        let stamp = registry.stamp();

        assert_eq!(registry.verify(stamp, 10), Ok(()));

        registry.invalidate_from(8);

        assert_eq!(registry.verify(stamp, 7), Ok(()));
        assert_eq!(registry.verify(stamp, 8), Err(Fault::Invalidated));
    }

    #[test]
    fn older_stamp_sees_lowest_newer_watermark() {
        let mut registry = CursorRegistry::new();
        let old = registry.stamp();

        registry.invalidate_from(3);
        let middle = registry.stamp();
        registry.invalidate_from(9);

        assert_eq!(registry.verify(old, 2), Ok(()));
        assert_eq!(registry.verify(old, 3), Err(Fault::Invalidated));
        assert_eq!(registry.verify(middle, 5), Ok(()));
        assert_eq!(registry.verify(middle, 9), Err(Fault::Invalidated));
    }

    #[test]
    fn lower_watermark_replaces_higher_ones() {
        let mut registry = CursorRegistry::new();
        let stamp = registry.stamp();

        registry.invalidate_from(10);
        registry.invalidate_from(20);
        registry.invalidate_from(5);

        assert_eq!(registry.watermark_count(), 1);
        assert_eq!(registry.verify(stamp, 4), Ok(()));
        assert_eq!(registry.verify(stamp, 5), Err(Fault::Invalidated));
    }

    #[test]
    fn rising_watermarks_stay_bounded() {
        let mut registry = CursorRegistry::new();

        for from in 0..10 * MAX_WATERMARKS {
            registry.invalidate_from(from);
        }

        assert_eq!(registry.watermark_count(), MAX_WATERMARKS);
    }

    #[test]
    fn stamp_older_than_retained_watermarks_is_invalid() {
        let mut registry = CursorRegistry::new();
        let ancient = registry.stamp();

        // Every watermark is above position 0, but the ones that could prove it are discarded.
        for from in 1..=2 * MAX_WATERMARKS {
            registry.invalidate_from(from);
        }

        assert_eq!(registry.verify(ancient, 0), Err(Fault::Invalidated));

        let recent = registry.stamp();
        registry.invalidate_from(3 * MAX_WATERMARKS);

        assert_eq!(registry.verify(recent, 0), Ok(()));
        assert_eq!(
            registry.verify(recent, 3 * MAX_WATERMARKS),
            Err(Fault::Invalidated)
        );
    }

    #[test]
    fn invalidate_all_hits_every_position() {
        let mut registry = CursorRegistry::new();
        let stamp = registry.stamp();

        registry.invalidate_from(7);
        registry.invalidate_all();

        assert_eq!(registry.verify(stamp, 0), Err(Fault::Invalidated));
        assert_eq!(registry.watermark_count(), 1);

        let fresh = registry.stamp();
        assert_eq!(registry.verify(fresh, 0), Ok(()));
    }
}
