use std::ops::*;

use fnv::FnvHashSet;

/// Presence mask over SPIR-V enumerant values.
///
/// Decorations and execution modes are mostly small integers, but the
/// vendor ranges start in the thousands, so values past 63 spill into a
/// hash set.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Bitset {
    lower: u64,
    higher: FnvHashSet<u32>,
}

impl Bitset {
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    #[inline]
    pub fn from_lower(lower: u64) -> Self {
        Self { lower, higher: Default::default() }
    }

    #[inline]
    pub fn get(&self, bit: u32) -> bool {
        if bit < 64 {
            self.lower & (1u64 << bit) != 0
        } else {
            self.higher.contains(&bit)
        }
    }

    #[inline]
    pub fn set(&mut self, bit: u32) {
        if bit < 64 {
            self.lower |= 1u64 << bit;
        } else {
            self.higher.insert(bit);
        }
    }

    #[inline]
    pub fn clear(&mut self, bit: u32) {
        if bit < 64 {
            self.lower &= !(1u64 << bit);
        } else {
            self.higher.remove(&bit);
        }
    }

    /// The first 64 bits as a plain integer mask.
    #[inline]
    pub fn lower(&self) -> u64 {
        self.lower
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.lower == 0 && self.higher.is_empty()
    }

    /// Iterates over set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let lower = self.lower;
        let mut higher: Vec<u32> = self.higher.iter().copied().collect();
        higher.sort_unstable();
        (0..64u32).filter(move |&bit| lower & (1u64 << bit) != 0)
            .chain(higher)
    }
}

impl BitOrAssign<&Bitset> for Bitset {
    #[inline]
    fn bitor_assign(&mut self, other: &Bitset) {
        self.lower |= other.lower;
        self.higher.extend(other.higher.iter().copied());
    }
}

impl BitOr<&Bitset> for Bitset {
    type Output = Bitset;
    #[inline]
    fn bitor(mut self, other: &Bitset) -> Bitset {
        self |= other;
        self
    }
}

impl std::fmt::Debug for Bitset {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
