// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::InstructionCategory;
use serde::Serialize;

/// Semantic operation of a decoded instruction. The printed form, which
/// distinguishes e.g. `ldur` from `ldrb`, lives in `Instruction::mnemonic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    B,
    BL,
    BR,
    BLR,
    RET,
    Bcc,
    CBZ,
    CBNZ,
    TBZ,
    TBNZ,
    ERET,

    ADR,
    ADRP,
    ADD,
    ADDS,
    SUB,
    SUBS,
    NEG,
    ADC,
    SBC,
    MUL,
    MADD,
    MSUB,
    MulLong,
    MulHigh,
    SDIV,
    UDIV,
    Bitfield,
    Extract,
    Extend,
    BitManip,
    Crc,

    CMP,
    CMN,
    TST,
    CCMP,
    CCMN,
    FCMP,

    MOV,
    MOVZ,
    MOVN,
    MOVK,
    MVN,
    FMOV,

    AND,
    ANDS,
    ORR,
    ORN,
    EOR,
    EON,
    BIC,

    LSL,
    LSR,
    ASR,
    ROR,

    CSEL,
    CSINC,
    CSINV,
    CSNEG,
    CSET,
    CSETM,
    CINC,
    CINV,
    CNEG,

    Load,
    Store,
    LoadPair,
    StorePair,
    LoadLiteral,
    LoadExclusive,
    StoreExclusive,
    Atomic,
    Prefetch,
    VectorLoad,
    VectorStore,

    FloatArith,
    FloatConvert,

    SVC,
    BRK,
    HLT,
    UDF,
    Hint,
    Pac,
    Barrier,
    MSR,
    MRS,
    SYS,

    Unknown,
}

impl Opcode {
    pub fn category(self) -> InstructionCategory {
        use Opcode::*;
        match self {
            B | BL | BR | BLR | RET | Bcc | CBZ | CBNZ | TBZ | TBNZ | ERET => InstructionCategory::Branch,
            Load | Store | LoadPair | StorePair | LoadLiteral | LoadExclusive | StoreExclusive | Atomic
            | Prefetch | VectorLoad | VectorStore => InstructionCategory::LoadStore,
            ADR | ADRP | ADD | ADDS | SUB | SUBS | NEG | ADC | SBC | MUL | MADD | MSUB | MulLong | MulHigh
            | SDIV | UDIV | Bitfield | Extract | Extend | BitManip | Crc | FloatArith | FloatConvert => {
                InstructionCategory::DataProcessing
            }
            AND | ANDS | ORR | ORN | EOR | EON | BIC => InstructionCategory::Logical,
            LSL | LSR | ASR | ROR => InstructionCategory::Shift,
            CMP | CMN | TST | CCMP | CCMN | FCMP => InstructionCategory::Compare,
            MOV | MOVZ | MOVN | MOVK | MVN | FMOV => InstructionCategory::Move,
            CSEL | CSINC | CSINV | CSNEG | CSET | CSETM | CINC | CINV | CNEG => InstructionCategory::Conditional,
            SVC | BRK | HLT | UDF | Hint | Pac | Barrier | MSR | MRS | SYS => InstructionCategory::System,
            Unknown => InstructionCategory::Unknown,
        }
    }

    pub fn is_load(self) -> bool {
        matches!(self, Opcode::Load | Opcode::LoadPair | Opcode::LoadLiteral | Opcode::LoadExclusive | Opcode::VectorLoad)
    }

    pub fn is_store(self) -> bool {
        matches!(self, Opcode::Store | Opcode::StorePair | Opcode::StoreExclusive | Opcode::VectorStore)
    }

    /// Flag-setting compares whose operands feed a following conditional.
    pub fn sets_flags(self) -> bool {
        matches!(self, Opcode::CMP | Opcode::CMN | Opcode::TST | Opcode::ADDS | Opcode::SUBS | Opcode::ANDS | Opcode::CCMP | Opcode::CCMN | Opcode::FCMP)
    }
}
