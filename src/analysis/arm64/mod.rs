// Tue Jan 13 2026 - Alex

pub mod condition;
pub mod decoder;
pub mod opcode;
pub mod operand;
pub mod register;

pub use condition::Condition;
pub use decoder::Arm64Decoder;
pub use opcode::Opcode;
pub use operand::{ExtendType, IndexMode, Operand, OperandType, ShiftType};
pub use register::{Register, RegisterBank, RegisterSize};

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum InstructionCategory {
    Branch,
    LoadStore,
    DataProcessing,
    Logical,
    Shift,
    Compare,
    Move,
    Conditional,
    System,
    Unknown,
}

/// One decoded instruction. Plain value type, safe to hand to renderers.
#[derive(Debug, Clone, Serialize)]
pub struct Instruction {
    pub address: u64,
    pub raw: u32,
    pub category: InstructionCategory,
    pub opcode: Opcode,
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub operand_str: String,
    pub condition: Option<Condition>,
    pub comment: Option<String>,
}

impl Instruction {
    pub fn new(address: u64, raw: u32, opcode: Opcode, mnemonic: impl Into<String>, operands: Vec<Operand>) -> Self {
        let operand_str = operands.iter().map(|op| op.to_string()).collect::<Vec<_>>().join(", ");
        Self {
            address,
            raw,
            category: opcode.category(),
            opcode,
            mnemonic: mnemonic.into(),
            operands,
            operand_str,
            condition: None,
            comment: None,
        }
    }

    /// Fallback for encodings the decoder does not model.
    pub fn unknown(address: u64, raw: u32) -> Self {
        Self::new(address, raw, Opcode::Unknown, format!("0x{:08x}", raw), Vec::new())
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.category == InstructionCategory::Unknown
    }

    pub fn is_call(&self) -> bool {
        matches!(self.opcode, Opcode::BL | Opcode::BLR)
    }

    pub fn is_return(&self) -> bool {
        matches!(self.opcode, Opcode::RET | Opcode::ERET)
    }

    pub fn is_conditional_branch(&self) -> bool {
        matches!(self.opcode, Opcode::Bcc | Opcode::CBZ | Opcode::CBNZ | Opcode::TBZ | Opcode::TBNZ)
            && !self.condition.map(|c| c.is_always()).unwrap_or(false)
    }

    pub fn is_unconditional_branch(&self) -> bool {
        matches!(self.opcode, Opcode::B | Opcode::BR)
            || (self.opcode == Opcode::Bcc && self.condition.map(|c| c.is_always()).unwrap_or(false))
    }

    pub fn is_indirect_branch(&self) -> bool {
        matches!(self.opcode, Opcode::BR | Opcode::BLR)
    }

    /// Ends a basic block: any branch that is not a call, or a return.
    pub fn is_block_terminator(&self) -> bool {
        self.is_return() || self.is_conditional_branch() || self.is_unconditional_branch()
    }

    /// Execution cannot continue at the next instruction.
    pub fn is_terminal(&self) -> bool {
        self.is_return() || self.is_unconditional_branch() || matches!(self.opcode, Opcode::BRK | Opcode::HLT | Opcode::UDF)
    }

    /// Direct branch or call destination.
    pub fn branch_target(&self) -> Option<u64> {
        match self.opcode {
            Opcode::B | Opcode::BL | Opcode::Bcc | Opcode::CBZ | Opcode::CBNZ | Opcode::TBZ | Opcode::TBNZ => {
                self.operands.iter().rev().find_map(Operand::get_address)
            }
            _ => None,
        }
    }

    /// Target of ADR/ADRP/literal loads.
    pub fn pc_relative_target(&self) -> Option<u64> {
        match self.opcode {
            Opcode::ADR | Opcode::ADRP | Opcode::LoadLiteral | Opcode::Prefetch => {
                self.operands.iter().find_map(Operand::get_address)
            }
            _ => None,
        }
    }

    pub fn is_load(&self) -> bool {
        self.opcode.is_load()
    }

    pub fn is_store(&self) -> bool {
        self.opcode.is_store()
    }

    pub fn memory_operand(&self) -> Option<&Operand> {
        self.operands.iter().find(|op| op.is_memory())
    }

    pub fn register_operand(&self, index: usize) -> Option<Register> {
        self.operands.get(index).and_then(Operand::get_register)
    }

    /// Register written by this instruction, if any.
    pub fn destination_register(&self) -> Option<Register> {
        match self.opcode.category() {
            InstructionCategory::Branch | InstructionCategory::Compare | InstructionCategory::Unknown => None,
            _ if self.is_store() || matches!(self.opcode, Opcode::Prefetch | Opcode::MSR | Opcode::SYS | Opcode::Hint | Opcode::Barrier | Opcode::SVC | Opcode::BRK | Opcode::HLT | Opcode::UDF) => None,
            _ => self.register_operand(0).filter(|r| !r.is_zero_register()),
        }
    }

    /// Immediate operand with any trailing `lsl #n` applied.
    pub fn immediate_value(&self) -> Option<i64> {
        let position = self.operands.iter().position(|op| op.get_immediate().is_some())?;
        let value = self.operands[position].get_immediate()?;
        match self.operands.get(position + 1).map(|op| &op.op_type) {
            Some(OperandType::Shift { shift_type: ShiftType::LSL, amount }) => Some(value << amount),
            _ => Some(value),
        }
    }

    pub fn text(&self) -> String {
        if self.operand_str.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{} {}", self.mnemonic, self.operand_str)
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}: {:08x}  {}", self.address, self.raw, self.text())?;
        if let Some(comment) = &self.comment {
            write!(f, " ; {}", comment)?;
        }
        Ok(())
    }
}

/// Decodes one instruction word.
pub fn decode_word(word: u32, address: u64) -> Instruction {
    Arm64Decoder::new().decode(address, word)
}

/// Decodes the little-endian word at the start of `bytes`; short input
/// decodes as an unknown zero-padded word.
pub fn decode(bytes: &[u8], address: u64) -> Instruction {
    let mut word = [0u8; 4];
    let len = bytes.len().min(4);
    word[..len].copy_from_slice(&bytes[..len]);
    let raw = u32::from_le_bytes(word);
    if len < 4 {
        return Instruction::unknown(address, raw);
    }
    decode_word(raw, address)
}

/// Decodes consecutive words starting at `address`.
pub fn decode_all(bytes: &[u8], address: u64) -> Vec<Instruction> {
    let decoder = Arm64Decoder::new();
    bytes
        .chunks_exact(4)
        .enumerate()
        .map(|(i, chunk)| {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            decoder.decode(address + (i as u64) * 4, raw)
        })
        .collect()
}
