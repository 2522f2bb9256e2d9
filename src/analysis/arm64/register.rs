// Tue Jan 13 2026 - Alex

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Register {
    pub bank: RegisterBank,
    pub index: u8,
    pub size: RegisterSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterBank {
    General,
    FloatingPoint,
    Vector,
    StackPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterSize {
    Byte,
    Half,
    Word,
    Double,
    Quad,
}

impl Register {
    pub const fn new(bank: RegisterBank, index: u8, size: RegisterSize) -> Self {
        Self { bank, index, size }
    }

    pub const fn x(index: u8) -> Self {
        Self::new(RegisterBank::General, index, RegisterSize::Double)
    }

    pub const fn w(index: u8) -> Self {
        Self::new(RegisterBank::General, index, RegisterSize::Word)
    }

    pub const fn sp() -> Self {
        Self::new(RegisterBank::StackPointer, 31, RegisterSize::Double)
    }

    pub const fn wsp() -> Self {
        Self::new(RegisterBank::StackPointer, 31, RegisterSize::Word)
    }

    pub const fn xzr() -> Self {
        Self::x(31)
    }

    pub const fn fp() -> Self {
        Self::x(29)
    }

    pub const fn lr() -> Self {
        Self::x(30)
    }

    /// General-purpose register where encoding 31 means the zero register.
    pub fn gp(index: u32, is_64: bool) -> Self {
        let index = (index & 0x1f) as u8;
        if is_64 {
            Self::x(index)
        } else {
            Self::w(index)
        }
    }

    /// General-purpose register where encoding 31 means the stack pointer.
    pub fn gp_or_sp(index: u32, is_64: bool) -> Self {
        match (index & 0x1f, is_64) {
            (31, true) => Self::sp(),
            (31, false) => Self::wsp(),
            (i, _) => Self::gp(i, is_64),
        }
    }

    pub fn fp_reg(index: u32, size: RegisterSize) -> Self {
        Self::new(RegisterBank::FloatingPoint, (index & 0x1f) as u8, size)
    }

    pub fn vector(index: u32) -> Self {
        Self::new(RegisterBank::Vector, (index & 0x1f) as u8, RegisterSize::Quad)
    }

    pub fn is_general(&self) -> bool {
        self.bank == RegisterBank::General
    }

    pub fn is_zero_register(&self) -> bool {
        self.bank == RegisterBank::General && self.index == 31
    }

    pub fn is_stack_pointer(&self) -> bool {
        self.bank == RegisterBank::StackPointer
    }

    pub fn is_frame_pointer(&self) -> bool {
        self.bank == RegisterBank::General && self.index == 29
    }

    pub fn is_link_register(&self) -> bool {
        self.bank == RegisterBank::General && self.index == 30
    }

    pub fn is_callee_saved(&self) -> bool {
        match self.bank {
            RegisterBank::General => (19..=28).contains(&self.index),
            RegisterBank::FloatingPoint => (8..=15).contains(&self.index),
            _ => false,
        }
    }

    pub fn is_argument(&self) -> bool {
        self.bank == RegisterBank::General && self.index <= 7
    }

    /// Same architectural register regardless of view width.
    pub fn same_storage(&self, other: &Register) -> bool {
        let bank = |r: &Register| match r.bank {
            RegisterBank::Vector => RegisterBank::FloatingPoint,
            b => b,
        };
        bank(self) == bank(other) && self.index == other.index
    }

    pub fn to_64bit(&self) -> Self {
        Self { size: RegisterSize::Double, ..*self }
    }
}

impl RegisterSize {
    pub fn bytes(&self) -> u8 {
        match self {
            RegisterSize::Byte => 1,
            RegisterSize::Half => 2,
            RegisterSize::Word => 4,
            RegisterSize::Double => 8,
            RegisterSize::Quad => 16,
        }
    }

    fn fp_prefix(&self) -> char {
        match self {
            RegisterSize::Byte => 'b',
            RegisterSize::Half => 'h',
            RegisterSize::Word => 's',
            RegisterSize::Double => 'd',
            RegisterSize::Quad => 'q',
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bank {
            RegisterBank::General => match (self.index, self.size) {
                (31, RegisterSize::Word) => write!(f, "wzr"),
                (31, _) => write!(f, "xzr"),
                (i, RegisterSize::Word) => write!(f, "w{}", i),
                (i, _) => write!(f, "x{}", i),
            },
            RegisterBank::StackPointer => match self.size {
                RegisterSize::Word => write!(f, "wsp"),
                _ => write!(f, "sp"),
            },
            RegisterBank::FloatingPoint => write!(f, "{}{}", self.size.fp_prefix(), self.index),
            RegisterBank::Vector => write!(f, "v{}", self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_31_views() {
        assert_eq!(Register::gp(31, true).to_string(), "xzr");
        assert_eq!(Register::gp(31, false).to_string(), "wzr");
        assert_eq!(Register::gp_or_sp(31, true).to_string(), "sp");
        assert_eq!(Register::gp_or_sp(31, false).to_string(), "wsp");
        assert_eq!(Register::gp_or_sp(29, true), Register::fp());
    }

    #[test]
    fn test_same_storage_ignores_width() {
        assert!(Register::w(3).same_storage(&Register::x(3)));
        assert!(!Register::x(3).same_storage(&Register::fp_reg(3, RegisterSize::Double)));
        assert!(Register::vector(8).same_storage(&Register::fp_reg(8, RegisterSize::Double)));
        assert_eq!(Register::fp_reg(2, RegisterSize::Quad).to_string(), "q2");
    }
}
