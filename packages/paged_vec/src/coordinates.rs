/// Location of an item within the page structure of a paged vector.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PageCoordinates {
    /// The index of the page containing this item.
    page_index: usize,

    /// The index within the page where this item is stored.
    offset: usize,
}

impl PageCoordinates {
    /// Translates a logical position into page coordinates.
    ///
    /// Power-of-two page sizes are translated with a shift and a mask. The condition depends only
    /// on a constant, so only one of the two paths survives compilation.
    #[must_use]
    #[inline]
    pub(crate) fn from_position<const PAGE_SIZE: usize>(position: usize) -> Self {
        if PAGE_SIZE.is_power_of_two() {
            let shift = const { PAGE_SIZE.trailing_zeros() };
            let mask = const { PAGE_SIZE.wrapping_sub(1) };

            Self {
                page_index: position >> shift,
                offset: position & mask,
            }
        } else {
            #[expect(
                clippy::integer_division,
                clippy::arithmetic_side_effects,
                reason = "PAGE_SIZE is a non-zero constant and we do want the floor here"
            )]
            let page_index = position / PAGE_SIZE;

            #[expect(
                clippy::modulo_arithmetic,
                clippy::arithmetic_side_effects,
                reason = "PAGE_SIZE is a non-zero constant"
            )]
            let offset = position % PAGE_SIZE;

            Self { page_index, offset }
        }
    }

    /// Returns the index of the page containing this item.
    #[must_use]
    #[inline]
    pub(crate) fn page_index(&self) -> usize {
        self.page_index
    }

    /// Returns the index within the page where this item is stored.
    #[must_use]
    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}

/// Number of pages required to hold `len` items.
#[must_use]
#[inline]
pub(crate) fn pages_for_len<const PAGE_SIZE: usize>(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_translation() {
        let coordinates = PageCoordinates::from_position::<4>(0);
        assert_eq!(coordinates.page_index(), 0);
        assert_eq!(coordinates.offset(), 0);

        let coordinates = PageCoordinates::from_position::<4>(7);
        assert_eq!(coordinates.page_index(), 1);
        assert_eq!(coordinates.offset(), 3);

        let coordinates = PageCoordinates::from_position::<1024>(1024 * 5 + 17);
        assert_eq!(coordinates.page_index(), 5);
        assert_eq!(coordinates.offset(), 17);
    }

    #[test]
    fn non_power_of_two_translation() {
        let coordinates = PageCoordinates::from_position::<3>(7);
        assert_eq!(coordinates.page_index(), 2);
        assert_eq!(coordinates.offset(), 1);

        let coordinates = PageCoordinates::from_position::<100>(99);
        assert_eq!(coordinates.page_index(), 0);
        assert_eq!(coordinates.offset(), 99);

        let coordinates = PageCoordinates::from_position::<100>(100);
        assert_eq!(coordinates.page_index(), 1);
        assert_eq!(coordinates.offset(), 0);
    }

    #[test]
    fn both_paths_agree() {
        for position in 0..200 {
            let shifted = PageCoordinates::from_position::<8>(position);
            assert_eq!(shifted.page_index(), position / 8);
            assert_eq!(shifted.offset(), position % 8);

            let divided = PageCoordinates::from_position::<7>(position);
            assert_eq!(divided.page_index(), position / 7);
            assert_eq!(divided.offset(), position % 7);
        }
    }

    #[test]
    fn page_size_of_one() {
        let coordinates = PageCoordinates::from_position::<1>(42);
        assert_eq!(coordinates.page_index(), 42);
        assert_eq!(coordinates.offset(), 0);
    }

    #[test]
    fn pages_for_len_rounds_up() {
        assert_eq!(pages_for_len::<4>(0), 0);
        assert_eq!(pages_for_len::<4>(1), 1);
        assert_eq!(pages_for_len::<4>(4), 1);
        assert_eq!(pages_for_len::<4>(5), 2);
        assert_eq!(pages_for_len::<3>(10), 4);
    }
}
