// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{IndexMode, Instruction, Opcode, OperandType, Register, RegisterBank, ShiftType};

const TRACKED: usize = 31;

/// An address produced or dereferenced by a tracked instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedAccess {
    /// `adr`, or `add` onto an `adrp` page: the address itself is the value.
    Computed(u64),
    Load(u64),
    Store(u64),
}

impl TrackedAccess {
    pub fn address(self) -> u64 {
        match self {
            TrackedAccess::Computed(a) | TrackedAccess::Load(a) | TrackedAccess::Store(a) => a,
        }
    }
}

/// Straight-line constant tracking for x0-x30, enough to follow
/// `adrp`/`add`/`ldr` address materialisation inside one function.
#[derive(Debug, Clone)]
pub struct RegisterTracker {
    values: [Option<u64>; TRACKED],
}

impl Default for RegisterTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(reg: Register) -> Option<usize> {
    (reg.bank == RegisterBank::General && (reg.index as usize) < TRACKED).then_some(reg.index as usize)
}

impl RegisterTracker {
    pub fn new() -> Self {
        Self { values: [None; TRACKED] }
    }

    pub fn value(&self, reg: Register) -> Option<u64> {
        slot(reg).and_then(|i| self.values[i])
    }

    pub fn reset(&mut self) {
        self.values = [None; TRACKED];
    }

    fn set(&mut self, reg: Register, value: Option<u64>) {
        if let Some(i) = slot(reg) {
            self.values[i] = value;
        }
    }

    fn clobber_call(&mut self) {
        for i in (0..=18).chain(std::iter::once(30)) {
            self.values[i] = None;
        }
    }

    /// Applies `instr` and reports the address it touched, if known.
    pub fn step(&mut self, instr: &Instruction) -> Option<TrackedAccess> {
        let dest = instr.register_operand(0);

        match instr.opcode {
            Opcode::ADRP => {
                let (rd, page) = (dest?, instr.pc_relative_target()?);
                self.set(rd, Some(page));
                None
            }
            Opcode::ADR => {
                let (rd, target) = (dest?, instr.pc_relative_target()?);
                self.set(rd, Some(target));
                Some(TrackedAccess::Computed(target))
            }
            Opcode::ADD | Opcode::SUB if instr.operands.len() >= 3 => {
                let rd = dest?;
                let base = instr.register_operand(1).and_then(|rn| self.value(rn));
                let offset = instr.immediate_value();
                let result = match (base, offset) {
                    (Some(base), Some(off)) if instr.opcode == Opcode::ADD => Some(base.wrapping_add(off as u64)),
                    (Some(base), Some(off)) => Some(base.wrapping_sub(off as u64)),
                    _ => None,
                };
                self.set(rd, result);
                result.map(TrackedAccess::Computed)
            }
            Opcode::MOV => {
                let rd = dest?;
                let value = match instr.operands.get(1).map(|op| &op.op_type) {
                    Some(OperandType::Register(src)) => self.value(*src),
                    Some(OperandType::Immediate(v)) => Some(*v as u64),
                    Some(OperandType::Bitmask(v)) => Some(*v),
                    _ => None,
                };
                self.set(rd, value);
                None
            }
            Opcode::MOVK => {
                let rd = dest?;
                let chunk = instr.operands.get(1).and_then(|op| op.get_immediate()).map(|v| v as u64);
                let shift = match instr.operands.get(2).map(|op| &op.op_type) {
                    Some(OperandType::Shift { shift_type: ShiftType::LSL, amount }) => *amount as u32,
                    _ => 0,
                };
                let updated = match (self.value(rd), chunk) {
                    (Some(old), Some(chunk)) => Some((old & !(0xffff << shift)) | (chunk << shift)),
                    _ => None,
                };
                self.set(rd, updated);
                None
            }
            Opcode::LoadLiteral => {
                let target = instr.pc_relative_target()?;
                if let Some(rt) = dest {
                    self.set(rt, None);
                }
                Some(TrackedAccess::Load(target))
            }
            Opcode::BL | Opcode::BLR => {
                self.clobber_call();
                None
            }
            _ if instr.is_load() || instr.is_store() => self.memory_access(instr),
            _ => {
                if let Some(rd) = instr.destination_register() {
                    self.set(rd, None);
                }
                None
            }
        }
    }

    fn memory_access(&mut self, instr: &Instruction) -> Option<TrackedAccess> {
        let (base, index, offset, mode) = match instr.memory_operand().map(|op| &op.op_type) {
            Some(OperandType::Memory { base, index, offset, mode, .. }) => (*base, *index, *offset, *mode),
            _ => return None,
        };

        let effective = match (index, mode) {
            (None, IndexMode::Offset | IndexMode::PreIndex) => self.value(base).map(|b| b.wrapping_add(offset as u64)),
            (None, IndexMode::PostIndex) => self.value(base),
            _ => None,
        };

        if mode != IndexMode::Offset {
            self.set(base, None);
        }
        if instr.is_load() {
            for op in instr.operands.iter().filter(|op| !op.is_memory()) {
                if let Some(reg) = op.get_register() {
                    self.set(reg, None);
                }
            }
        }

        let address = effective?;
        Some(if instr.is_store() { TrackedAccess::Store(address) } else { TrackedAccess::Load(address) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::decode_word;

    const PC: u64 = 0x1_0000_1000;

    fn run(words: &[u32]) -> (RegisterTracker, Vec<Option<TrackedAccess>>) {
        let mut tracker = RegisterTracker::new();
        let accesses = words
            .iter()
            .enumerate()
            .map(|(i, &w)| tracker.step(&decode_word(w, PC + i as u64 * 4)))
            .collect();
        (tracker, accesses)
    }

    #[test]
    fn test_adrp_add_materialises_address() {
        // adrp x0, #0x1000 ; add x0, x0, #0x10
        let (tracker, accesses) = run(&[0xb0000000, 0x91004000]);
        assert_eq!(accesses[0], None);
        assert_eq!(accesses[1], Some(TrackedAccess::Computed(0x1_0000_2010)));
        assert_eq!(tracker.value(Register::x(0)), Some(0x1_0000_2010));
    }

    #[test]
    fn test_adrp_ldr_str_through_base() {
        // adrp x8, #0x1000 ; ldr x9, [x8, #0x20] ; str x9, [x8, #0x28]
        let (tracker, accesses) = run(&[0xb0000008, 0xf9401109, 0xf9001509]);
        assert_eq!(accesses[1], Some(TrackedAccess::Load(0x1_0000_2020)));
        assert_eq!(accesses[2], Some(TrackedAccess::Store(0x1_0000_2028)));
        assert_eq!(tracker.value(Register::x(9)), None);
    }

    #[test]
    fn test_calls_and_writes_clobber() {
        // adr x1, #0x40 ; mov x19, x1 ; bl ; mov w1, #5
        let (tracker, accesses) = run(&[0x10000201, 0xaa0103f3, 0x94000010, 0x528000a1]);
        assert_eq!(accesses[0], Some(TrackedAccess::Computed(PC + 0x40)));
        assert_eq!(tracker.value(Register::x(19)), Some(PC + 0x40));
        assert_eq!(tracker.value(Register::x(1)), Some(5));

        let (tracker, _) = run(&[0x10000201, 0x94000010]);
        assert_eq!(tracker.value(Register::x(1)), None);
    }

    #[test]
    fn test_literal_load() {
        // ldr x0, #0x10
        let (_, accesses) = run(&[0x58000080]);
        assert_eq!(accesses[0], Some(TrackedAccess::Load(PC + 0x10)));
    }
}
