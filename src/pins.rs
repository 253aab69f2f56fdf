//! Pin masks and pin groups.

use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use crate::chip::MAX_GPIOS;

/// A set of GPIOs, by absolute GPIO number.
///
/// Wide enough for every GPIO of the largest supported chip, so it is used
/// before the block's GPIO base has been chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PinMask(u64);

impl PinMask {
    pub const NONE: PinMask = PinMask(0);

    pub const fn from_bits(bits: u64) -> Self {
        PinMask(bits)
    }

    /// Just `pin`. Empty when `pin` does not fit the mask.
    pub const fn pin(pin: u8) -> Self {
        if pin < 64 {
            PinMask(1 << pin)
        } else {
            PinMask::NONE
        }
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, pin: u8) -> bool {
        (pin as usize) < MAX_GPIOS && self.0 & (1 << pin) != 0
    }

    pub fn insert(&mut self, pin: u8) {
        self.0 |= PinMask::pin(pin).0;
    }

    pub fn remove(&mut self, pin: u8) {
        self.0 &= !PinMask::pin(pin).0;
    }

    /// Lowest pin in the mask.
    pub const fn first(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    /// Highest pin in the mask.
    pub const fn last(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(63 - self.0.leading_zeros() as u8)
        }
    }

    /// Place the low `count` bits of `value` starting at `first`.
    ///
    /// Used to turn a mask relative to a pin group into absolute GPIO numbers.
    pub const fn spread(first: u8, count: u8, value: u32) -> Self {
        let mask = if count >= 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        };
        if first >= 64 {
            return PinMask::NONE;
        }
        PinMask(((value & mask) as u64) << first)
    }

    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0..MAX_GPIOS as u8).filter(move |pin| self.contains(*pin))
    }
}

impl BitOr for PinMask {
    type Output = PinMask;
    fn bitor(self, rhs: Self) -> Self {
        PinMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for PinMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PinMask {
    type Output = PinMask;
    fn bitand(self, rhs: Self) -> Self {
        PinMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for PinMask {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for PinMask {
    type Output = PinMask;
    fn not(self) -> Self {
        PinMask(!self.0)
    }
}

/// A span of consecutive GPIOs serving one role of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinGroup {
    /// First GPIO of the group.
    pub first: u8,
    /// Number of consecutive GPIOs.
    pub count: u8,
}

impl PinGroup {
    pub const fn new(first: u8, count: u8) -> Self {
        PinGroup { first, count }
    }

    /// Spread a mask relative to this group onto absolute GPIOs.
    pub const fn spread(&self, value: u32) -> PinMask {
        PinMask::spread(self.first, self.count, value)
    }

    pub const fn mask(&self) -> PinMask {
        self.spread(u32::MAX)
    }
}

/// Pull resistor configuration of a single pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_past_the_mask_are_empty() {
        assert_eq!(PinMask::pin(63).bits(), 1 << 63);
        assert_eq!(PinMask::pin(64), PinMask::NONE);
        assert_eq!(PinMask::pin(u8::MAX), PinMask::NONE);
        assert!(!PinMask::pin(200).contains(200));

        let mut mask = PinMask::pin(3);
        mask.insert(100);
        mask.remove(100);
        assert_eq!(mask, PinMask::pin(3));
        assert_eq!(PinGroup::new(70, 2).mask(), PinMask::NONE);
    }

    #[test]
    fn spread_places_relative_bits() {
        assert_eq!(PinGroup::new(4, 3).spread(0b101).bits(), 0b101 << 4);
        assert_eq!(PinGroup::new(40, 2).mask().bits(), 0b11 << 40);
        assert_eq!(PinMask::pin(9).iter().collect::<Vec<_>>(), [9]);
    }
}
