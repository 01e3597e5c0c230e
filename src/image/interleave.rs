/// Sector interleave (skew) mapping

/// Permutation between logical sector indices and physical slots on a track
///
/// An identity mapping carries no table; lookups outside the table range
/// pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Interleave {
    to_physical: Vec<usize>,
    to_logical: Vec<usize>,
}

impl Interleave {
    /// Identity mapping
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build the mapping for a track of `sectors_per_track` sectors
    ///
    /// Each logical index is placed at the destination cursor, moving on to
    /// the next free slot if that one is taken; the cursor then advances by
    /// `interleave`. A table is only built for `1 < interleave < sectors_per_track`
    /// and more than two sectors per track.
    pub fn build(sectors_per_track: usize, interleave: usize) -> Self {
        if sectors_per_track <= 2 || interleave <= 1 || interleave >= sectors_per_track {
            return Self::identity();
        }

        let mut to_physical = vec![0usize; sectors_per_track];
        let mut occupied = vec![false; sectors_per_track];
        let mut dst = 0usize;
        for logical in 0..sectors_per_track {
            while occupied[dst] {
                dst = (dst + 1) % sectors_per_track;
            }
            occupied[dst] = true;
            to_physical[logical] = dst;
            dst = (dst + interleave) % sectors_per_track;
        }

        let mut to_logical = vec![0usize; sectors_per_track];
        for (logical, &physical) in to_physical.iter().enumerate() {
            to_logical[physical] = logical;
        }

        Self {
            to_physical,
            to_logical,
        }
    }

    /// Whether this is the identity mapping
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.to_physical.is_empty()
    }

    /// Physical slot of a logical sector index
    #[inline]
    pub fn to_physical(&self, logical: usize) -> usize {
        self.to_physical.get(logical).copied().unwrap_or(logical)
    }

    /// Logical sector index stored in a physical slot
    #[inline]
    pub fn to_logical(&self, physical: usize) -> usize {
        self.to_logical.get(physical).copied().unwrap_or(physical)
    }

    /// Number of sectors covered by the table (0 for identity)
    pub fn len(&self) -> usize {
        self.to_physical.len()
    }

    /// Whether the table is empty (identity mapping)
    pub fn is_empty(&self) -> bool {
        self.to_physical.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_identity_cases() {
        assert!(Interleave::build(9, 1).is_identity());
        assert!(Interleave::build(9, 0).is_identity());
        assert!(Interleave::build(9, 9).is_identity());
        assert!(Interleave::build(2, 2).is_identity());
        assert_eq!(Interleave::identity().to_physical(5), 5);
    }

    #[test]
    fn test_interleave_2_of_9() {
        let map = Interleave::build(9, 2);
        let layout: Vec<usize> = (0..9).map(|i| map.to_physical(i)).collect();
        assert_eq!(layout, vec![0, 2, 4, 6, 8, 1, 3, 5, 7]);
    }

    #[test]
    fn test_interleave_3_of_5() {
        let map = Interleave::build(5, 3);
        let layout: Vec<usize> = (0..5).map(|i| map.to_physical(i)).collect();
        assert_eq!(layout, vec![0, 3, 1, 4, 2]);
    }

    #[test]
    fn test_interleave_with_common_divisor() {
        let map = Interleave::build(4, 2);
        let layout: Vec<usize> = (0..4).map(|i| map.to_physical(i)).collect();
        assert_eq!(layout, vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_out_of_range_passes_through() {
        let map = Interleave::build(5, 2);
        assert_eq!(map.to_physical(7), 7);
        assert_eq!(map.to_logical(12), 12);
    }

    proptest! {
        #[test]
        fn prop_interleave_is_bijection(spt in 3usize..64, factor in 2usize..64) {
            prop_assume!(factor < spt);
            let map = Interleave::build(spt, factor);
            prop_assert_eq!(map.len(), spt);

            let mut seen = vec![false; spt];
            for logical in 0..spt {
                let physical = map.to_physical(logical);
                prop_assert!(physical < spt);
                prop_assert!(!seen[physical]);
                seen[physical] = true;
                prop_assert_eq!(map.to_logical(physical), logical);
            }
        }
    }
}
