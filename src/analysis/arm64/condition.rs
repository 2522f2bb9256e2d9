// Tue Jan 13 2026 - Alex

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Condition {
    EQ,
    NE,
    HS,
    LO,
    MI,
    PL,
    VS,
    VC,
    HI,
    LS,
    GE,
    LT,
    GT,
    LE,
    AL,
    NV,
}

impl Condition {
    pub fn from_code(code: u32) -> Self {
        match code & 0xf {
            0x0 => Condition::EQ,
            0x1 => Condition::NE,
            0x2 => Condition::HS,
            0x3 => Condition::LO,
            0x4 => Condition::MI,
            0x5 => Condition::PL,
            0x6 => Condition::VS,
            0x7 => Condition::VC,
            0x8 => Condition::HI,
            0x9 => Condition::LS,
            0xa => Condition::GE,
            0xb => Condition::LT,
            0xc => Condition::GT,
            0xd => Condition::LE,
            0xe => Condition::AL,
            _ => Condition::NV,
        }
    }

    pub fn invert(self) -> Self {
        match self {
            Condition::EQ => Condition::NE,
            Condition::NE => Condition::EQ,
            Condition::HS => Condition::LO,
            Condition::LO => Condition::HS,
            Condition::MI => Condition::PL,
            Condition::PL => Condition::MI,
            Condition::VS => Condition::VC,
            Condition::VC => Condition::VS,
            Condition::HI => Condition::LS,
            Condition::LS => Condition::HI,
            Condition::GE => Condition::LT,
            Condition::LT => Condition::GE,
            Condition::GT => Condition::LE,
            Condition::LE => Condition::GT,
            Condition::AL => Condition::NV,
            Condition::NV => Condition::AL,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Condition::EQ => "eq",
            Condition::NE => "ne",
            Condition::HS => "hs",
            Condition::LO => "lo",
            Condition::MI => "mi",
            Condition::PL => "pl",
            Condition::VS => "vs",
            Condition::VC => "vc",
            Condition::HI => "hi",
            Condition::LS => "ls",
            Condition::GE => "ge",
            Condition::LT => "lt",
            Condition::GT => "gt",
            Condition::LE => "le",
            Condition::AL => "al",
            Condition::NV => "nv",
        }
    }

    /// C-like comparison operator for a preceding `cmp a, b`.
    pub fn comparison_operator(self) -> Option<&'static str> {
        match self {
            Condition::EQ => Some("=="),
            Condition::NE => Some("!="),
            Condition::GE | Condition::HS => Some(">="),
            Condition::LT | Condition::LO => Some("<"),
            Condition::GT | Condition::HI => Some(">"),
            Condition::LE | Condition::LS => Some("<="),
            _ => None,
        }
    }

    pub fn is_always(self) -> bool {
        matches!(self, Condition::AL | Condition::NV)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Condition::HS | Condition::LO | Condition::HI | Condition::LS)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
