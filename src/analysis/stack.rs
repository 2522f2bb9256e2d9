// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{IndexMode, Instruction, Opcode, OperandType, Register};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;

const PROLOGUE_WINDOW: usize = 8;

static STACK_OPERAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(sp|x29|fp)(?:, #(-)?0x([0-9a-f]+))?\]!?$").expect("stack operand regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrologueKind {
    /// `sub sp` then `stp x29, x30` then frame pointer set.
    Standard,
    /// Pre-indexed `stp ..., [sp, #-n]!` doing the decrement, then frame pointer set.
    Compact,
    /// Stack decrement without a frame pointer.
    Leaf,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackVariable {
    /// Relative to the frame pointer when `from_fp`, else to the
    /// stack pointer after the prologue.
    pub offset: i64,
    pub name: String,
    pub size: u32,
    pub is_saved_register: bool,
    pub from_fp: bool,
    /// SP-relative slot outside the local frame in a function with no
    /// frame pointer; may be a caller argument.
    pub ambiguous: bool,
}

/// Linear-scan model of one function's frame. Offsets are tracked relative
/// to the stack pointer at entry, so slots are keyed independently of
/// whether they were reached through SP or FP.
#[derive(Debug, Clone)]
pub struct StackFrameTracker {
    prologue: PrologueKind,
    sp: i64,
    fp: Option<i64>,
    frame_size: u64,
    in_prologue: bool,
    slots: BTreeMap<i64, StackVariable>,
}

impl Default for StackFrameTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn is_frame_setup(instr: &Instruction) -> bool {
    matches!(instr.opcode, Opcode::Hint | Opcode::Pac)
}

fn sp_immediate(instr: &Instruction) -> Option<(Register, Register, i64)> {
    let rd = instr.register_operand(0)?;
    let rn = instr.register_operand(1)?;
    Some((rd, rn, instr.immediate_value()?))
}

impl StackFrameTracker {
    pub fn new() -> Self {
        Self {
            prologue: PrologueKind::None,
            sp: 0,
            fp: None,
            frame_size: 0,
            in_prologue: true,
            slots: BTreeMap::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Runs the full scan over one function.
    pub fn analyze(instructions: &[Instruction]) -> Self {
        let mut tracker = Self::new();
        tracker.detect_prologue(instructions);
        for instr in instructions {
            tracker.process_instruction(instr);
        }
        log::trace!(
            "Stack frame: {:?}, size 0x{:x}, {} variables",
            tracker.prologue,
            tracker.frame_size,
            tracker.slots.len()
        );
        tracker
    }

    /// Classifies the prologue from the first few instructions without
    /// changing the running offsets.
    pub fn detect_prologue(&mut self, instructions: &[Instruction]) -> PrologueKind {
        let mut body = instructions.iter().filter(|i| !is_frame_setup(i)).take(PROLOGUE_WINDOW);
        let first = match body.next() {
            Some(first) => first,
            None => {
                self.prologue = PrologueKind::None;
                return self.prologue;
            }
        };

        let explicit_decrement = first.opcode == Opcode::SUB
            && sp_immediate(first).map_or(false, |(rd, rn, _)| rd.is_stack_pointer() && rn.is_stack_pointer());
        let compact_decrement = first.opcode == Opcode::StorePair
            && matches!(
                first.memory_operand().map(|op| &op.op_type),
                Some(OperandType::Memory { base, offset, mode: IndexMode::PreIndex, .. })
                    if base.is_stack_pointer() && *offset < 0
            );

        let mut saves_frame_pair = compact_decrement && Self::stores_frame_pair(first);
        let mut sets_fp = false;
        for instr in body {
            if instr.is_block_terminator() || instr.is_call() {
                break;
            }
            saves_frame_pair |= Self::stores_frame_pair(instr);
            sets_fp |= Self::sets_frame_pointer(instr);
        }

        self.prologue = match (explicit_decrement, compact_decrement, sets_fp) {
            (true, _, true) if saves_frame_pair => PrologueKind::Standard,
            (_, true, true) => PrologueKind::Compact,
            (true, _, _) | (_, true, false) => PrologueKind::Leaf,
            _ => PrologueKind::None,
        };
        self.prologue
    }

    fn stores_frame_pair(instr: &Instruction) -> bool {
        instr.opcode == Opcode::StorePair
            && instr.register_operand(0).map_or(false, |r| r.is_frame_pointer())
            && instr.register_operand(1).map_or(false, |r| r.is_link_register())
    }

    fn sets_frame_pointer(instr: &Instruction) -> bool {
        let dest_fp = instr.register_operand(0).map_or(false, |r| r.is_frame_pointer());
        let from_sp = instr.register_operand(1).map_or(false, |r| r.is_stack_pointer());
        dest_fp && from_sp && matches!(instr.opcode, Opcode::MOV | Opcode::ADD)
    }

    pub fn process_instruction(&mut self, instr: &Instruction) {
        let touches_frame = self.adjust_registers(instr) || self.record_access(instr) || is_frame_setup(instr);
        if !touches_frame {
            self.in_prologue = false;
        }
    }

    /// SP/FP arithmetic. Returns true if the instruction was one.
    fn adjust_registers(&mut self, instr: &Instruction) -> bool {
        match instr.opcode {
            Opcode::ADD | Opcode::SUB => {
                let Some((rd, rn, imm)) = sp_immediate(instr) else { return false };
                let delta = if instr.opcode == Opcode::ADD { imm } else { -imm };
                let source = if rn.is_stack_pointer() {
                    Some(self.sp)
                } else if rn.is_frame_pointer() {
                    self.fp
                } else {
                    None
                };
                let Some(source) = source else { return false };
                if rd.is_stack_pointer() {
                    self.set_sp(source + delta);
                    true
                } else if rd.is_frame_pointer() && rn.is_stack_pointer() {
                    self.set_fp(source + delta);
                    true
                } else {
                    false
                }
            }
            Opcode::MOV => {
                let (Some(rd), Some(rn)) = (instr.register_operand(0), instr.register_operand(1)) else {
                    return false;
                };
                if rd.is_frame_pointer() && rn.is_stack_pointer() {
                    self.set_fp(self.sp);
                    true
                } else if rd.is_stack_pointer() && rn.is_frame_pointer() {
                    if let Some(fp) = self.fp {
                        self.set_sp(fp);
                    }
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn set_sp(&mut self, value: i64) {
        self.sp = value;
        if value < 0 {
            self.frame_size = self.frame_size.max(value.unsigned_abs());
        }
    }

    fn set_fp(&mut self, value: i64) {
        if self.fp.is_none() {
            self.fp = Some(value);
            let slots: Vec<i64> = self.slots.keys().copied().collect();
            for slot in slots {
                let renamed = self.describe(slot);
                if let Some(var) = self.slots.get_mut(&slot) {
                    var.offset = renamed.0;
                    var.from_fp = true;
                    var.ambiguous = false;
                    if !var.is_saved_register {
                        var.name = renamed.1;
                    }
                }
            }
        }
    }

    /// Loads and stores through SP or FP with an immediate offset.
    fn record_access(&mut self, instr: &Instruction) -> bool {
        if !(instr.is_load() || instr.is_store()) {
            return false;
        }
        let Some(OperandType::Memory { base, index: None, offset, mode, .. }) =
            instr.memory_operand().map(|op| op.op_type.clone())
        else {
            return false;
        };

        let base_value = if base.is_stack_pointer() {
            self.sp
        } else if base.is_frame_pointer() {
            match self.fp {
                Some(fp) => fp,
                None => return false,
            }
        } else {
            return false;
        };

        let address = match mode {
            IndexMode::PostIndex => base_value,
            IndexMode::Offset | IndexMode::PreIndex => base_value + offset,
        };
        if mode != IndexMode::Offset {
            let updated = base_value + offset;
            if base.is_stack_pointer() {
                self.set_sp(updated);
            } else {
                self.fp = Some(updated);
            }
        }

        let pair = matches!(instr.opcode, Opcode::LoadPair | Opcode::StorePair);
        let registers: Vec<Register> = if pair {
            (0..2).filter_map(|i| instr.register_operand(i)).collect()
        } else {
            instr.register_operand(0).into_iter().collect()
        };

        let mut slot = address;
        for reg in registers {
            let size = reg.size.bytes() as u32;
            let saved = self.in_prologue
                && instr.is_store()
                && (reg.is_callee_saved() || reg.is_frame_pointer() || reg.is_link_register());
            self.add_variable(slot, size, saved.then_some(reg));
            slot += size as i64;
        }
        true
    }

    /// (display offset, conventional name) for an entry-relative slot.
    fn describe(&self, slot: i64) -> (i64, String) {
        match self.fp {
            Some(fp) => {
                let offset = slot - fp;
                let name = if offset < 0 {
                    format!("var_{:x}", offset.unsigned_abs())
                } else {
                    format!("arg_{:x}", offset)
                };
                (offset, name)
            }
            None => {
                let offset = slot + self.frame_size as i64;
                (offset, format!("var_{:x}", offset.unsigned_abs()))
            }
        }
    }

    fn add_variable(&mut self, slot: i64, size: u32, saved: Option<Register>) {
        if self.slots.contains_key(&slot) || self.overlaps(slot, size) {
            return;
        }
        let (offset, name) = self.describe(slot);
        let name = match saved {
            Some(reg) => format!("saved_{}", reg.to_64bit()),
            None => name,
        };
        let variable = StackVariable {
            offset,
            name,
            size,
            is_saved_register: saved.is_some(),
            from_fp: self.fp.is_some(),
            ambiguous: self.fp.is_none() && slot >= 0,
        };
        if variable.ambiguous {
            log::debug!("Stack slot {} lies above the frame of a function without FP", variable.name);
        }
        self.slots.insert(slot, variable);
    }

    fn overlaps(&self, slot: i64, size: u32) -> bool {
        let end = slot + size as i64;
        let before = self.slots.range(..slot).next_back().map_or(false, |(&s, v)| s + v.size as i64 > slot);
        let after = self.slots.range(slot..end).next().is_some();
        before || after
    }

    pub fn prologue(&self) -> PrologueKind {
        self.prologue
    }

    pub fn has_fp(&self) -> bool {
        self.fp.is_some()
    }

    pub fn frame_size(&self) -> u64 {
        self.frame_size
    }

    /// Ordered from the lowest stack address up.
    pub fn variables(&self) -> impl Iterator<Item = &StackVariable> {
        self.slots.values()
    }

    pub fn locals(&self) -> impl Iterator<Item = &StackVariable> {
        self.slots.values().filter(|v| !v.is_saved_register)
    }

    pub fn variable_at_offset(&self, offset: i64, from_fp: bool) -> Option<&StackVariable> {
        self.slots.values().find(|v| v.offset == offset && v.from_fp == from_fp)
    }

    /// Variable for `[base, #offset]`, with SP taken at its post-prologue
    /// value.
    pub fn variable_for_memory(&self, base: Register, offset: i64) -> Option<&StackVariable> {
        let slot = if base.is_stack_pointer() {
            offset - self.frame_size as i64
        } else if base.is_frame_pointer() {
            self.fp? + offset
        } else {
            return None;
        };
        self.slots.get(&slot)
    }

    /// Name for a rendered memory operand such as `[x29, #-0x8]`.
    pub fn variable_for_operand(&self, operand: &str) -> Option<String> {
        let caps = STACK_OPERAND.captures(operand.trim())?;
        let base = match &caps[1] {
            "sp" => Register::sp(),
            _ => Register::fp(),
        };
        let magnitude = match caps.get(3) {
            Some(hex) => i64::from_str_radix(hex.as_str(), 16).ok()?,
            None => 0,
        };
        let offset = if caps.get(2).is_some() { -magnitude } else { magnitude };
        self.variable_for_memory(base, offset).map(|v| v.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::decode_all;
    use crate::container::testing::words_to_bytes;

    fn track(words: &[u32]) -> StackFrameTracker {
        StackFrameTracker::analyze(&decode_all(&words_to_bytes(words), 0x1_0000_1000))
    }

    #[test]
    fn test_standard_prologue_with_local() {
        let tracker = track(&[
            0xd10083ff, // sub sp, sp, #0x20
            0xa9017bfd, // stp x29, x30, [sp, #0x10]
            0x910043fd, // add x29, sp, #0x10
            0xf90007e0, // str x0, [sp, #0x8]
        ]);
        assert_eq!(tracker.prologue(), PrologueKind::Standard);
        assert!(tracker.has_fp());
        assert_eq!(tracker.frame_size(), 0x20);

        let local = tracker.variable_at_offset(-0x8, true).unwrap();
        assert_eq!(local.name, "var_8");
        assert_eq!(local.size, 8);
        assert!(!local.is_saved_register);

        assert_eq!(tracker.variable_at_offset(0, true).unwrap().name, "saved_x29");
        assert_eq!(tracker.variable_at_offset(0x8, true).unwrap().name, "saved_x30");
        assert_eq!(tracker.variable_for_operand("[sp, #0x8]").as_deref(), Some("var_8"));
        assert_eq!(tracker.variable_for_operand("[x29, #-0x8]").as_deref(), Some("var_8"));
        assert_eq!(tracker.variable_for_operand("[x1, #0x8]"), None);
        assert_eq!(tracker.variable_for_operand("[sp, #0x40]"), None);
    }

    #[test]
    fn test_compact_prologue_fp_relative_access() {
        let tracker = track(&[
            0xd503237f, // pacibsp
            0xa9bf7bfd, // stp x29, x30, [sp, #-0x10]!
            0x910003fd, // mov x29, sp
            0xb81fc3a0, // stur w0, [x29, #-0x4]
            0xa8c17bfd, // ldp x29, x30, [sp], #0x10
            0xd65f03c0, // ret
        ]);
        assert_eq!(tracker.prologue(), PrologueKind::Compact);
        assert!(tracker.has_fp());
        assert_eq!(tracker.frame_size(), 0x10);
        let var = tracker.variable_at_offset(-0x4, true).unwrap();
        assert_eq!(var.name, "var_4");
        assert_eq!(var.size, 4);
        assert_eq!(tracker.locals().count(), 1);
    }

    #[test]
    fn test_leaf_frame_flags_slots_above_frame() {
        let tracker = track(&[
            0xd10043ff, // sub sp, sp, #0x10
            0xf90007e0, // str x0, [sp, #0x8]
            0xf9400fe1, // ldr x1, [sp, #0x18]
            0x910043ff, // add sp, sp, #0x10
            0xd65f03c0, // ret
        ]);
        assert_eq!(tracker.prologue(), PrologueKind::Leaf);
        assert!(!tracker.has_fp());
        assert_eq!(tracker.frame_size(), 0x10);

        let local = tracker.variable_at_offset(0x8, false).unwrap();
        assert_eq!(local.name, "var_8");
        assert!(!local.ambiguous);

        let above = tracker.variable_at_offset(0x18, false).unwrap();
        assert!(above.ambiguous);
        assert!(!above.name.starts_with("arg_"));
    }

    #[test]
    fn test_no_prologue_and_no_overlap() {
        let mut tracker = track(&[
            0xd2800020, // mov x0, #1
            0xd65f03c0, // ret
        ]);
        assert_eq!(tracker.prologue(), PrologueKind::None);
        assert_eq!(tracker.variables().count(), 0);

        tracker.add_variable(-0x10, 8, None);
        tracker.add_variable(-0xc, 4, None);
        tracker.add_variable(-0x8, 8, None);
        let slots: Vec<i64> = tracker.slots.keys().copied().collect();
        assert_eq!(slots, vec![-0x10, -0x8]);

        tracker.reset();
        assert_eq!(tracker.variables().count(), 0);
    }
}
