// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{Condition, Register};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShiftType {
    LSL,
    LSR,
    ASR,
    ROR,
}

impl ShiftType {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => ShiftType::LSL,
            1 => ShiftType::LSR,
            2 => ShiftType::ASR,
            _ => ShiftType::ROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtendType {
    UXTB,
    UXTH,
    UXTW,
    UXTX,
    SXTB,
    SXTH,
    SXTW,
    SXTX,
    LSL,
}

impl ExtendType {
    pub fn from_option(option: u32) -> Self {
        match option & 7 {
            0 => ExtendType::UXTB,
            1 => ExtendType::UXTH,
            2 => ExtendType::UXTW,
            3 => ExtendType::UXTX,
            4 => ExtendType::SXTB,
            5 => ExtendType::SXTH,
            6 => ExtendType::SXTW,
            _ => ExtendType::SXTX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexMode {
    Offset,
    PreIndex,
    PostIndex,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OperandType {
    Register(Register),
    Immediate(i64),
    /// Logical-immediate bit pattern, printed unsigned.
    Bitmask(u64),
    /// Small decimal quantities: shift amounts, bit numbers, field widths.
    Count(u32),
    FloatImmediate(f64),
    /// A resolved absolute target of a PC-relative encoding.
    Address(u64),
    Memory {
        base: Register,
        index: Option<Register>,
        offset: i64,
        mode: IndexMode,
        extend: Option<(ExtendType, u8)>,
    },
    Shift {
        shift_type: ShiftType,
        amount: u8,
    },
    Extend {
        extend_type: ExtendType,
        amount: u8,
    },
    Condition(Condition),
    SystemRegister(u16),
    Symbolic(String),
    VectorList {
        first: u8,
        count: u8,
        arrangement: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operand {
    pub op_type: OperandType,
    /// Access width in bytes for memory operands, register width otherwise.
    pub size: u8,
}

impl Operand {
    pub fn register(reg: Register) -> Self {
        Self { op_type: OperandType::Register(reg), size: reg.size.bytes() }
    }

    pub fn immediate(value: i64) -> Self {
        Self { op_type: OperandType::Immediate(value), size: 8 }
    }

    pub fn bitmask(value: u64) -> Self {
        Self { op_type: OperandType::Bitmask(value), size: 8 }
    }

    pub fn count(value: u32) -> Self {
        Self { op_type: OperandType::Count(value), size: 1 }
    }

    pub fn address(target: u64) -> Self {
        Self { op_type: OperandType::Address(target), size: 8 }
    }

    pub fn memory(base: Register, offset: i64, mode: IndexMode, size: u8) -> Self {
        Self {
            op_type: OperandType::Memory { base, index: None, offset, mode, extend: None },
            size,
        }
    }

    pub fn memory_indexed(base: Register, index: Register, extend: Option<(ExtendType, u8)>, size: u8) -> Self {
        Self {
            op_type: OperandType::Memory { base, index: Some(index), offset: 0, mode: IndexMode::Offset, extend },
            size,
        }
    }

    pub fn shift(shift_type: ShiftType, amount: u8) -> Self {
        Self { op_type: OperandType::Shift { shift_type, amount }, size: 1 }
    }

    pub fn extend(extend_type: ExtendType, amount: u8) -> Self {
        Self { op_type: OperandType::Extend { extend_type, amount }, size: 1 }
    }

    pub fn condition(cond: Condition) -> Self {
        Self { op_type: OperandType::Condition(cond), size: 1 }
    }

    pub fn system_register(encoding: u16) -> Self {
        Self { op_type: OperandType::SystemRegister(encoding), size: 8 }
    }

    pub fn symbolic(text: impl Into<String>) -> Self {
        Self { op_type: OperandType::Symbolic(text.into()), size: 0 }
    }

    pub fn get_register(&self) -> Option<Register> {
        match self.op_type {
            OperandType::Register(r) => Some(r),
            _ => None,
        }
    }

    pub fn get_immediate(&self) -> Option<i64> {
        match self.op_type {
            OperandType::Immediate(v) => Some(v),
            OperandType::Bitmask(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn get_address(&self) -> Option<u64> {
        match self.op_type {
            OperandType::Address(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.op_type, OperandType::Memory { .. })
    }
}

fn write_signed_hex(f: &mut fmt::Formatter<'_>, value: i64) -> fmt::Result {
    if value < 0 {
        write!(f, "#-0x{:x}", value.unsigned_abs())
    } else {
        write!(f, "#0x{:x}", value)
    }
}

impl fmt::Display for ShiftType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShiftType::LSL => "lsl",
            ShiftType::LSR => "lsr",
            ShiftType::ASR => "asr",
            ShiftType::ROR => "ror",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ExtendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtendType::UXTB => "uxtb",
            ExtendType::UXTH => "uxth",
            ExtendType::UXTW => "uxtw",
            ExtendType::UXTX => "uxtx",
            ExtendType::SXTB => "sxtb",
            ExtendType::SXTH => "sxth",
            ExtendType::SXTW => "sxtw",
            ExtendType::SXTX => "sxtx",
            ExtendType::LSL => "lsl",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op_type {
            OperandType::Register(r) => write!(f, "{}", r),
            OperandType::Immediate(v) => write_signed_hex(f, *v),
            OperandType::Bitmask(v) => write!(f, "#0x{:x}", v),
            OperandType::Count(v) => write!(f, "#{}", v),
            OperandType::FloatImmediate(v) => write!(f, "#{:.8}", v),
            OperandType::Address(a) => write!(f, "0x{:x}", a),
            OperandType::Memory { base, index, offset, mode, extend } => {
                write!(f, "[{}", base)?;
                if let (Some(index), IndexMode::Offset) = (index, mode) {
                    write!(f, ", {}", index)?;
                    match extend {
                        Some((ExtendType::LSL, 0)) | None => {}
                        Some((kind, 0)) => write!(f, ", {}", kind)?,
                        Some((kind, amount)) => write!(f, ", {} #{}", kind, amount)?,
                    }
                    return write!(f, "]");
                }
                match mode {
                    IndexMode::Offset if *offset == 0 => write!(f, "]"),
                    IndexMode::Offset => {
                        write!(f, ", ")?;
                        write_signed_hex(f, *offset)?;
                        write!(f, "]")
                    }
                    IndexMode::PreIndex => {
                        write!(f, ", ")?;
                        write_signed_hex(f, *offset)?;
                        write!(f, "]!")
                    }
                    IndexMode::PostIndex => {
                        write!(f, "], ")?;
                        match index {
                            Some(reg) => write!(f, "{}", reg),
                            None => write_signed_hex(f, *offset),
                        }
                    }
                }
            }
            OperandType::Shift { shift_type, amount } => write!(f, "{} #{}", shift_type, amount),
            OperandType::Extend { extend_type, amount: 0 } => write!(f, "{}", extend_type),
            OperandType::Extend { extend_type, amount } => write!(f, "{} #{}", extend_type, amount),
            OperandType::Condition(c) => write!(f, "{}", c),
            OperandType::SystemRegister(enc) => f.write_str(&system_register_name(*enc)),
            OperandType::Symbolic(text) => f.write_str(text),
            OperandType::VectorList { first, count, arrangement } => {
                write!(f, "{{ ")?;
                for i in 0..*count {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "v{}.{}", (first + i) % 32, arrangement)?;
                }
                write!(f, " }}")
            }
        }
    }
}

/// Name of an `MRS`/`MSR` system register from its 16-bit `op0:op1:CRn:CRm:op2` encoding.
pub fn system_register_name(encoding: u16) -> String {
    let name = match encoding {
        0xde82 => "tpidr_el0",
        0xde83 => "tpidrro_el0",
        0xda10 => "nzcv",
        0xda20 => "fpcr",
        0xda21 => "fpsr",
        0xd801 => "ctr_el0",
        0xd807 => "dczid_el0",
        0xdf00 => "cntfrq_el0",
        0xdf01 => "cntpct_el0",
        0xdf02 => "cntvct_el0",
        0xc000 => "midr_el1",
        0xc005 => "mpidr_el1",
        0xda11 => "daif",
        _ => {
            let op0 = (encoding >> 14) & 3;
            let op1 = (encoding >> 11) & 7;
            let crn = (encoding >> 7) & 0xf;
            let crm = (encoding >> 3) & 0xf;
            let op2 = encoding & 7;
            return format!("s{}_{}_c{}_c{}_{}", op0, op1, crn, crm, op2);
        }
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_rendering() {
        let sp = Register::sp();
        assert_eq!(Operand::memory(sp, 0, IndexMode::Offset, 8).to_string(), "[sp]");
        assert_eq!(Operand::memory(sp, 0x10, IndexMode::Offset, 8).to_string(), "[sp, #0x10]");
        assert_eq!(Operand::memory(sp, -0x20, IndexMode::PreIndex, 8).to_string(), "[sp, #-0x20]!");
        assert_eq!(Operand::memory(sp, 0x20, IndexMode::PostIndex, 8).to_string(), "[sp], #0x20");
        let indexed = Operand::memory_indexed(Register::x(0), Register::w(1), Some((ExtendType::SXTW, 2)), 4);
        assert_eq!(indexed.to_string(), "[x0, w1, sxtw #2]");
        let plain = Operand::memory_indexed(Register::x(0), Register::x(1), Some((ExtendType::LSL, 0)), 8);
        assert_eq!(plain.to_string(), "[x0, x1]");
    }

    #[test]
    fn test_system_register_names() {
        assert_eq!(system_register_name(0xde83), "tpidrro_el0");
        assert_eq!(system_register_name(0xc001), "s3_0_c0_c0_1");
    }
}
