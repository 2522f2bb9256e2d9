// Tue Jan 13 2026 - Alex

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A virtual address inside the analysed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address {
    value: u64,
}

impl Address {
    pub const fn new(value: u64) -> Self {
        Self { value }
    }

    pub const fn as_u64(&self) -> u64 {
        self.value
    }

    pub fn is_aligned(&self, alignment: u64) -> bool {
        alignment != 0 && self.value % alignment == 0
    }

    /// Signed displacement, wrapping on overflow like the hardware does.
    pub fn offset(&self, delta: i64) -> Self {
        Self { value: self.value.wrapping_add(delta as u64) }
    }

    pub fn checked_add(&self, rhs: u64) -> Option<Self> {
        self.value.checked_add(rhs).map(Self::new)
    }

    pub fn distance(&self, other: Self) -> i64 {
        self.value.wrapping_sub(other.value) as i64
    }

    pub fn is_within_range(&self, start: Self, end: Self) -> bool {
        self.value >= start.value && self.value < end.value
    }

    /// Short form used in synthesized names: `100003f20`.
    pub fn short_hex(&self) -> String {
        format!("{:x}", self.value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.value)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.value, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.value, f)
    }
}

impl Add<u64> for Address {
    type Output = Self;
    fn add(self, rhs: u64) -> Self::Output {
        Self { value: self.value.wrapping_add(rhs) }
    }
}

impl Sub<u64> for Address {
    type Output = Self;
    fn sub(self, rhs: u64) -> Self::Output {
        Self { value: self.value.wrapping_sub(rhs) }
    }
}

impl Sub<Address> for Address {
    type Output = i64;
    fn sub(self, rhs: Address) -> Self::Output {
        self.distance(rhs)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_wraps_instead_of_panicking() {
        let addr = Address::new(0x10);
        assert_eq!(addr.offset(-0x20).as_u64(), 0xffff_ffff_ffff_fff0);
        assert_eq!(Address::new(u64::MAX) + 1, Address::new(0));
    }

    #[test]
    fn test_display_and_distance() {
        let a = Address::new(0x1_0000_4000);
        let b = Address::new(0x1_0000_3ff0);
        assert_eq!(a.to_string(), "0x100004000");
        assert_eq!(a - b, 0x10);
        assert_eq!(b.distance(a), -0x10);
        assert!(b.is_within_range(b, a));
        assert!(!a.is_within_range(b, a));
    }
}
