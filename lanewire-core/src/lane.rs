//! Lane indices and lane sets.
//!
//! An endpoint has up to [`MAX_LANES`] lanes. Lanes are addressed by a small
//! integer index; "no lane" and "no resource" are expressed with `Option`
//! rather than sentinel values.

use std::fmt;

/// Maximum number of lanes per endpoint.
pub const MAX_LANES: usize = 8;

/// Maximum scatter-gather entries considered for zero-copy thresholds.
pub const MAX_IOV: usize = 16;

/// Index of a lane inside an endpoint.
pub type LaneIndex = u8;

/// Index of a transport resource (device + transport pair) in the worker.
pub type ResourceIndex = u8;

/// Index of a memory domain.
pub type MdIndex = u8;

/// Set of lanes, iterated in ascending index order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LaneMap(u8);

impl LaneMap {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Lanes `0..num_lanes`.
    #[must_use]
    pub const fn first_n(num_lanes: usize) -> Self {
        if num_lanes >= MAX_LANES {
            Self(u8::MAX)
        } else {
            Self(((1u16 << num_lanes) - 1) as u8)
        }
    }

    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, lane: LaneIndex) -> bool {
        (lane as usize) < MAX_LANES && self.0 & (1 << lane) != 0
    }

    #[inline]
    pub fn insert(&mut self, lane: LaneIndex) {
        debug_assert!((lane as usize) < MAX_LANES);
        self.0 |= 1 << lane;
    }

    #[inline]
    pub fn remove(&mut self, lane: LaneIndex) {
        debug_assert!((lane as usize) < MAX_LANES);
        self.0 &= !(1 << lane);
    }

    /// Lowest lane in the set.
    #[inline]
    #[must_use]
    pub const fn first(&self) -> Option<LaneIndex> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as LaneIndex)
        }
    }

    /// Iterate lanes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = LaneIndex> {
        let bits = self.0;
        (0..MAX_LANES as LaneIndex).filter(move |l| bits & (1 << l) != 0)
    }
}

impl FromIterator<LaneIndex> for LaneMap {
    fn from_iter<I: IntoIterator<Item = LaneIndex>>(iter: I) -> Self {
        let mut map = Self::empty();
        for lane in iter {
            map.insert(lane);
        }
        map
    }
}

impl fmt::Display for LaneMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}
