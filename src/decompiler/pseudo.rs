// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{
    Condition, ExtendType, IndexMode, Instruction, Opcode, Operand, OperandType, Register, ShiftType,
};
use crate::analysis::cfg::{CfgBuilder, ControlFlowGraph, EdgeKind};
use crate::analysis::dataflow::{RegisterTracker, TrackedAccess};
use crate::analysis::function::DetectedFunction;
use crate::analysis::stack::{StackFrameTracker, StackVariable};
use crate::decompiler::StringMap;
use crate::symbol::{quote_string, ResolvedType, SymbolResolver};
use itertools::Itertools;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

const INDENT: &str = "    ";
const ARGUMENT_REGISTERS: u8 = 8;

#[derive(Debug, Clone)]
enum Flags {
    Compare(String, String),
    Test(String, String),
}

/// Values known to live in a register because they were loaded from
/// Objective-C reference tables.
#[derive(Debug, Clone)]
enum Symbolic {
    Selector(String),
    Class(String),
}

#[derive(Default)]
struct BlockState {
    tracker: RegisterTracker,
    flags: Option<Flags>,
    symbolic: HashMap<u8, Symbolic>,
    args_written: u8,
}

impl BlockState {
    fn forget(&mut self, reg: Register) {
        if reg.is_general() {
            self.symbolic.remove(&reg.index);
        }
    }

    fn after_call(&mut self) {
        self.symbolic.clear();
        self.flags = None;
        self.args_written = 0;
    }
}

fn c_type(size: u8) -> &'static str {
    match size {
        1 => "uint8_t",
        2 => "uint16_t",
        4 => "uint32_t",
        16 => "__uint128_t",
        _ => "uint64_t",
    }
}

fn local_type(size: u32) -> &'static str {
    match size {
        1 => "int8_t",
        2 => "int16_t",
        4 => "int32_t",
        16 => "__int128_t",
        _ => "int64_t",
    }
}

/// `-[Foo bar:]` becomes `Foo_bar`; anything already a C identifier is kept.
fn c_identifier(name: &str) -> String {
    let ident = name
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|part| !part.is_empty())
        .join("_");
    match ident.chars().next() {
        None => "sub".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{}", ident),
        Some(_) => ident,
    }
}

fn number(value: i64) -> String {
    if (-9..=9).contains(&value) {
        value.to_string()
    } else if value < 0 {
        format!("-0x{:x}", value.unsigned_abs())
    } else {
        format!("0x{:x}", value)
    }
}

fn negate(expr: &str) -> String {
    match expr.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None => format!("-{}", expr),
    }
}

fn binary_operator(opcode: Opcode) -> Option<&'static str> {
    Some(match opcode {
        Opcode::ADD | Opcode::ADDS => "+",
        Opcode::SUB | Opcode::SUBS => "-",
        Opcode::MUL => "*",
        Opcode::SDIV | Opcode::UDIV => "/",
        Opcode::AND | Opcode::ANDS => "&",
        Opcode::ORR => "|",
        Opcode::EOR => "^",
        Opcode::BIC => "& ~",
        Opcode::ORN => "| ~",
        Opcode::EON => "^ ~",
        Opcode::LSL => "<<",
        Opcode::LSR | Opcode::ASR => ">>",
        _ => return None,
    })
}

fn is_saved_class(reg: &Register) -> bool {
    reg.is_callee_saved() || reg.is_frame_pointer() || reg.is_link_register()
}

fn memory_parts(instr: &Instruction) -> Option<(Register, Option<Register>, i64, IndexMode, Option<(ExtendType, u8)>)> {
    match instr.memory_operand().map(|op| &op.op_type) {
        Some(OperandType::Memory { base, index, offset, mode, extend }) => Some((*base, *index, *offset, *mode, *extend)),
        _ => None,
    }
}

fn transfer_registers(instr: &Instruction) -> Vec<Register> {
    let count = if matches!(instr.opcode, Opcode::LoadPair | Opcode::StorePair) { 2 } else { 1 };
    (0..count).filter_map(|i| instr.register_operand(i)).collect()
}

/// Register reads relevant to argument inference. Calls and direct
/// branches are not counted.
fn reads_register(instr: &Instruction, index: u8) -> bool {
    if instr.is_call() || matches!(instr.opcode, Opcode::B | Opcode::Bcc) {
        return false;
    }
    let target = Register::x(index);
    let written = match instr.opcode {
        Opcode::LoadPair => 2,
        _ if instr.destination_register().is_some() => 1,
        _ => 0,
    };
    instr.operands.iter().enumerate().any(|(i, op)| match &op.op_type {
        OperandType::Register(r) => i >= written && r.is_general() && r.same_storage(&target),
        OperandType::Memory { base, index, .. } => {
            base.same_storage(&target) || index.map_or(false, |ix| ix.same_storage(&target))
        }
        _ => false,
    })
}

fn writes_register(instr: &Instruction, index: u8) -> bool {
    let target = Register::x(index);
    if instr.is_call() {
        return index <= 18;
    }
    let second = instr.opcode == Opcode::LoadPair && instr.register_operand(1).map_or(false, |r| r.same_storage(&target));
    second || instr.destination_register().map_or(false, |r| r.is_general() && r.same_storage(&target))
}

/// Prologue and epilogue instructions that carry no program logic.
fn is_frame_bookkeeping(instr: &Instruction, stack: &StackFrameTracker) -> bool {
    match instr.opcode {
        Opcode::Hint | Opcode::Pac => true,
        Opcode::ADD | Opcode::SUB | Opcode::MOV => {
            let rd = instr.register_operand(0);
            let rn = instr.register_operand(1);
            match (rd, rn) {
                (Some(rd), Some(rn)) => {
                    (rd.is_stack_pointer() && (rn.is_stack_pointer() || rn.is_frame_pointer()))
                        || (rd.is_frame_pointer() && rn.is_stack_pointer())
                }
                _ => false,
            }
        }
        Opcode::LoadPair | Opcode::StorePair => {
            let through_frame = memory_parts(instr).map_or(false, |(base, ..)| base.is_stack_pointer() || base.is_frame_pointer());
            through_frame && transfer_registers(instr).iter().all(is_saved_class)
        }
        Opcode::Load | Opcode::Store => match memory_parts(instr) {
            Some((base, None, offset, IndexMode::Offset, _)) => {
                let reg = instr.register_operand(0);
                reg.map_or(false, |r| r.is_frame_pointer() || r.is_link_register())
                    || stack.variable_for_memory(base, offset).map_or(false, |v| v.is_saved_register)
            }
            Some((base, None, _, _, _)) => {
                base.is_stack_pointer() && instr.register_operand(0).map_or(false, |r| is_saved_class(&r))
            }
            _ => false,
        },
        _ => false,
    }
}

/// Renders functions as C-like text. The output is a reading aid: names
/// fall back to registers and raw addresses wherever resolution fails.
pub struct PseudoCodeGenerator<'a> {
    resolver: &'a SymbolResolver,
    strings: &'a StringMap,
}

impl<'a> PseudoCodeGenerator<'a> {
    pub fn new(resolver: &'a SymbolResolver, strings: &'a StringMap) -> Self {
        Self { resolver, strings }
    }

    pub fn generate_function(&self, function: &DetectedFunction, instructions: &[Instruction]) -> String {
        let cfg = CfgBuilder::build(function.display_name(), instructions);
        let stack = StackFrameTracker::analyze(instructions);
        self.generate(&cfg, &stack)
    }

    /// Pseudo-code for instructions that need not form a known function.
    pub fn pseudo_code_for_range(&self, instructions: &[Instruction]) -> String {
        let start = instructions.first().map_or(0, |i| i.address);
        let cfg = CfgBuilder::build(format!("range_{:x}", start), instructions);
        let stack = StackFrameTracker::analyze(instructions);
        self.generate(&cfg, &stack)
    }

    pub fn generate(&self, cfg: &ControlFlowGraph, stack: &StackFrameTracker) -> String {
        let mut out = String::new();
        let end = cfg.blocks().last().map_or(cfg.start, |b| b.end);
        writeln!(out, "// {} @ 0x{:x} - 0x{:x}", cfg.function_name, cfg.start, end).ok();
        writeln!(out, "int64_t {}({}) {{", c_identifier(&cfg.function_name), self.signature(cfg)).ok();

        let locals: Vec<&StackVariable> = stack.locals().collect();
        for var in &locals {
            let base = if var.from_fp { "fp" } else { "sp" };
            let sign = if var.offset < 0 { "-" } else { "+" };
            let note = if var.ambiguous { ", ambiguous" } else { "" };
            writeln!(
                out,
                "{}{} {}; // [{} {} 0x{:x}{}]",
                INDENT,
                local_type(var.size),
                var.name,
                base,
                sign,
                var.offset.unsigned_abs(),
                note
            )
            .ok();
        }
        if !locals.is_empty() {
            out.push('\n');
        }

        let labelled: BTreeSet<u64> = cfg
            .edges()
            .iter()
            .filter(|e| matches!(e.kind, EdgeKind::ConditionalTrue | EdgeKind::Unconditional))
            .map(|e| e.to)
            .collect();

        for block in cfg.blocks() {
            if labelled.contains(&block.start) {
                let suffix = if block.is_loop_header { " // loop" } else { "" };
                writeln!(out, "loc_{:x}:{}", block.start, suffix).ok();
            }
            let mut state = BlockState::default();
            for (i, instr) in block.instructions.iter().enumerate() {
                let rest = &block.instructions[i + 1..];
                for line in self.statement(instr, rest, cfg, stack, &mut state) {
                    writeln!(out, "{}{}", INDENT, line).ok();
                }
            }
        }

        out.push_str("}\n");
        out
    }

    /// Parameters are the argument registers read before being written.
    fn signature(&self, cfg: &ControlFlowGraph) -> String {
        let mut count = 0;
        for index in 0..ARGUMENT_REGISTERS {
            let first_use = cfg
                .blocks()
                .iter()
                .flat_map(|b| b.instructions.iter())
                .find(|instr| reads_register(instr, index) || writes_register(instr, index));
            if first_use.map_or(false, |instr| reads_register(instr, index)) {
                count = index + 1;
            }
        }
        if count == 0 {
            "void".to_string()
        } else {
            (0..count).map(|i| format!("int64_t x{}", i)).join(", ")
        }
    }

    fn statement(
        &self,
        instr: &Instruction,
        rest: &[Instruction],
        cfg: &ControlFlowGraph,
        stack: &StackFrameTracker,
        state: &mut BlockState,
    ) -> Vec<String> {
        let indirect_target = match instr.opcode {
            Opcode::BLR | Opcode::BR => instr.register_operand(0).and_then(|r| state.tracker.value(r)),
            _ => None,
        };
        let access = state.tracker.step(instr);

        if is_frame_bookkeeping(instr, stack) {
            return Vec::new();
        }

        let lines = self.translate(instr, rest, cfg, stack, state, access, indirect_target);

        if !instr.is_call() {
            for index in 0..ARGUMENT_REGISTERS {
                if writes_register(instr, index) {
                    state.args_written = state.args_written.max(index + 1);
                }
            }
        }
        lines
    }

    #[allow(clippy::too_many_arguments)]
    fn translate(
        &self,
        instr: &Instruction,
        rest: &[Instruction],
        cfg: &ControlFlowGraph,
        stack: &StackFrameTracker,
        state: &mut BlockState,
        access: Option<TrackedAccess>,
        indirect_target: Option<u64>,
    ) -> Vec<String> {
        if instr.is_unknown() {
            return vec![format!("// undecoded {}", instr.text())];
        }

        match instr.opcode {
            Opcode::BL => {
                let target = instr.branch_target().map(|t| self.resolver.format_address(t));
                let name = target.unwrap_or_else(|| "unknown".to_string());
                vec![self.call(&name, rest, state, false)]
            }
            Opcode::BLR => {
                let name = match (indirect_target, instr.register_operand(0)) {
                    (Some(addr), _) => self.resolver.format_address(addr),
                    (None, Some(reg)) => format!("(*{})", reg),
                    (None, None) => "(*unknown)".to_string(),
                };
                vec![self.call(&name, rest, state, false)]
            }
            Opcode::RET => vec!["return x0;".to_string()],
            Opcode::BR => match (indirect_target, instr.register_operand(0)) {
                (Some(addr), _) => vec![self.call(&self.resolver.format_address(addr), rest, state, true)],
                (None, Some(reg)) => vec![format!("goto *{};", reg)],
                (None, None) => vec![format!("// {}", instr.text())],
            },
            Opcode::B => match instr.branch_target() {
                Some(target) => vec![self.jump(target, cfg, rest, state)],
                None => vec![format!("// {}", instr.text())],
            },
            _ if instr.is_conditional_branch() => {
                let Some(target) = instr.branch_target() else {
                    return vec![format!("// {}", instr.text())];
                };
                let condition = self.branch_condition(instr, state);
                vec![format!("if ({}) {}", condition, self.jump(target, cfg, rest, state))]
            }
            Opcode::CMP | Opcode::FCMP => {
                let srcs = self.sources(&instr.operands);
                if let [a, b, ..] = srcs.as_slice() {
                    state.flags = Some(Flags::Compare(a.clone(), b.clone()));
                }
                Vec::new()
            }
            Opcode::CMN => {
                let srcs = self.sources(&instr.operands);
                if let [a, b, ..] = srcs.as_slice() {
                    state.flags = Some(Flags::Compare(a.clone(), negate(b)));
                }
                Vec::new()
            }
            Opcode::TST => {
                let srcs = self.sources(&instr.operands);
                if let [a, b, ..] = srcs.as_slice() {
                    state.flags = Some(Flags::Test(a.clone(), b.clone()));
                }
                Vec::new()
            }
            Opcode::CCMP | Opcode::CCMN => {
                state.flags = None;
                vec![format!("// {}", instr.text())]
            }
            Opcode::ADRP => self.adrp(instr, rest, state),
            Opcode::ADR => match (instr.register_operand(0), access) {
                (Some(rd), Some(TrackedAccess::Computed(addr))) => {
                    state.forget(rd);
                    vec![format!("{} = {};", rd, self.address_expr(addr))]
                }
                _ => vec![format!("// {}", instr.text())],
            },
            Opcode::LoadLiteral => {
                let (Some(rt), Some(addr)) = (instr.register_operand(0), instr.pc_relative_target()) else {
                    return vec![format!("// {}", instr.text())];
                };
                state.forget(rt);
                vec![format!("{} = {};", rt, self.load_expr(addr, rt.size.bytes(), rt, state))]
            }
            _ if instr.is_load() || instr.is_store() => self.memory(instr, stack, state, access),
            _ => self.data_processing(instr, stack, state, access),
        }
    }

    fn adrp(&self, instr: &Instruction, rest: &[Instruction], state: &mut BlockState) -> Vec<String> {
        let (Some(rd), Some(page)) = (instr.register_operand(0), instr.pc_relative_target()) else {
            return vec![format!("// {}", instr.text())];
        };
        state.forget(rd);
        let consumed = rest.first().map_or(false, |next| {
            let as_base = memory_parts(next).map_or(false, |(base, ..)| base.same_storage(&rd));
            let as_addend = matches!(next.opcode, Opcode::ADD | Opcode::SUB)
                && next.register_operand(1).map_or(false, |r| r.same_storage(&rd));
            as_base || as_addend
        });
        if consumed {
            Vec::new()
        } else {
            vec![format!("{} = 0x{:x};", rd, page)]
        }
    }

    fn call(&self, name: &str, rest: &[Instruction], state: &mut BlockState, tail: bool) -> String {
        let args = (0..state.args_written).map(|i| format!("x{}", i)).join(", ");
        let expr = format!("{}({})", name, args);

        let annotation = if name.starts_with("objc_msgSend") {
            let selector = match state.symbolic.get(&1) {
                Some(Symbolic::Selector(sel)) => Some(sel.clone()),
                _ => None,
            };
            selector.map(|sel| {
                let receiver = match state.symbolic.get(&0) {
                    Some(Symbolic::Class(class)) => class.clone(),
                    _ => "x0".to_string(),
                };
                format!(" // [{} {}]", receiver, sel)
            })
        } else {
            None
        };

        let used = rest
            .iter()
            .find(|i| i.is_return() || i.is_call() || reads_register(i, 0) || writes_register(i, 0))
            .map_or(false, |i| i.is_return() || reads_register(i, 0));

        state.after_call();
        let line = if tail {
            format!("return {};", expr)
        } else if used {
            format!("x0 = {};", expr)
        } else {
            format!("{};", expr)
        };
        format!("{}{}", line, annotation.unwrap_or_default())
    }

    fn jump(&self, target: u64, cfg: &ControlFlowGraph, rest: &[Instruction], state: &mut BlockState) -> String {
        if cfg.block_starting_at(target).is_some() {
            format!("goto loc_{:x};", target)
        } else {
            let name = self.resolver.format_address(target);
            self.call(&name, rest, state, true)
        }
    }

    fn branch_condition(&self, instr: &Instruction, state: &BlockState) -> String {
        let tested = instr.operands.first().map(|op| self.source(op)).unwrap_or_default();
        match instr.opcode {
            Opcode::CBZ => format!("{} == 0", tested),
            Opcode::CBNZ => format!("{} != 0", tested),
            Opcode::TBZ | Opcode::TBNZ => {
                let bit = instr
                    .operands
                    .iter()
                    .find_map(|op| match op.op_type {
                        OperandType::Count(b) => Some(b),
                        _ => None,
                    })
                    .unwrap_or(0);
                let op = if instr.opcode == Opcode::TBZ { "==" } else { "!=" };
                format!("({} & 0x{:x}) {} 0", tested, 1u64 << (bit & 63), op)
            }
            _ => match instr.condition {
                Some(cond) => self.condition_expr(state.flags.as_ref(), cond),
                None => "cond".to_string(),
            },
        }
    }

    fn condition_expr(&self, flags: Option<&Flags>, cond: Condition) -> String {
        match (flags, cond) {
            (Some(Flags::Compare(a, b)), _) => match cond.comparison_operator() {
                Some(op) => format!("{} {} {}", a, op, b),
                None => format!("cond_{}({}, {})", cond.mnemonic(), a, b),
            },
            (Some(Flags::Test(a, b)), Condition::EQ) => format!("({} & {}) == 0", a, b),
            (Some(Flags::Test(a, b)), Condition::NE) => format!("({} & {}) != 0", a, b),
            _ => format!("cond_{}", cond.mnemonic()),
        }
    }

    fn source(&self, op: &Operand) -> String {
        match &op.op_type {
            OperandType::Register(r) if r.is_zero_register() => "0".to_string(),
            OperandType::Register(r) => r.to_string(),
            OperandType::Immediate(v) => number(*v),
            OperandType::Bitmask(v) => format!("0x{:x}", v),
            OperandType::Count(v) => v.to_string(),
            OperandType::FloatImmediate(v) => format!("{}", v),
            OperandType::Address(addr) => self.address_expr(*addr),
            OperandType::Condition(c) => c.mnemonic().to_string(),
            _ => op.to_string(),
        }
    }

    /// Source operands with shift and extend modifiers folded in.
    fn sources(&self, operands: &[Operand]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for op in operands {
            match (&op.op_type, out.last_mut()) {
                (OperandType::Shift { shift_type, amount }, Some(last)) => {
                    *last = match shift_type {
                        ShiftType::LSL => format!("({} << {})", last, amount),
                        ShiftType::LSR | ShiftType::ASR => format!("({} >> {})", last, amount),
                        ShiftType::ROR => format!("ror({}, {})", last, amount),
                    };
                }
                (OperandType::Extend { extend_type, amount }, Some(last)) => {
                    let widened = match extend_type {
                        ExtendType::SXTB | ExtendType::SXTH | ExtendType::SXTW | ExtendType::SXTX => {
                            format!("(int64_t){}", last)
                        }
                        _ => last.clone(),
                    };
                    *last = if *amount > 0 { format!("({} << {})", widened, amount) } else { widened };
                }
                (OperandType::Condition(_), _) => {}
                _ => out.push(self.source(op)),
            }
        }
        out
    }

    fn address_expr(&self, addr: u64) -> String {
        if let Some(text) = self.strings.containing(addr) {
            return quote_string(text);
        }
        let resolved = self.resolver.resolve_address(addr);
        match resolved.kind {
            ResolvedType::String => resolved.comment.unwrap_or(resolved.name),
            ResolvedType::ObjCSelector => format!("@selector({})", resolved.name),
            ResolvedType::Data => format!("&{}", resolved.name),
            ResolvedType::Unknown => format!("0x{:x}", addr),
            _ => resolved.name,
        }
    }

    /// Value loaded from a resolved address. Selector and class reference
    /// loads are remembered for `objc_msgSend` annotation.
    fn load_expr(&self, addr: u64, size: u8, dest: Register, state: &mut BlockState) -> String {
        let resolved = self.resolver.resolve_address(addr);
        match resolved.kind {
            ResolvedType::ObjCSelector => {
                if dest.is_general() {
                    state.symbolic.insert(dest.index, Symbolic::Selector(resolved.name.clone()));
                }
                format!("@selector({})", resolved.name)
            }
            ResolvedType::ObjCClass => {
                if dest.is_general() {
                    state.symbolic.insert(dest.index, Symbolic::Class(resolved.name.clone()));
                }
                resolved.name
            }
            _ => format!("*({} *){}", c_type(size), self.address_expr(addr)),
        }
    }

    fn memory(
        &self,
        instr: &Instruction,
        stack: &StackFrameTracker,
        state: &mut BlockState,
        access: Option<TrackedAccess>,
    ) -> Vec<String> {
        let Some((base, index, offset, mode, extend)) = memory_parts(instr) else {
            return vec![format!("// {}", instr.text())];
        };
        let registers = transfer_registers(instr);
        let pair = registers.len() == 2;
        let single_size = instr.memory_operand().map_or(8, |op| op.size);
        let mut lines = Vec::new();

        let effective = match mode {
            IndexMode::PostIndex => 0,
            _ => offset,
        };
        if mode == IndexMode::PreIndex {
            lines.push(format!("{} += {};", base, number(offset)));
        }

        let mut slot_offset = effective;
        for reg in &registers {
            let size = if pair { reg.size.bytes() } else { single_size };
            // Written-back bases are taken after the update.
            let relative = if mode == IndexMode::Offset { slot_offset } else { slot_offset - effective };
            let slot = if index.is_none() { stack.variable_for_memory(base, relative) } else { None };

            let location = match (slot, access) {
                (Some(var), _) => var.name.clone(),
                (None, Some(TrackedAccess::Load(addr))) if !pair && instr.is_load() => {
                    state.forget(*reg);
                    let value = self.load_expr(addr, size, *reg, state);
                    lines.push(format!("{} = {};", reg, value));
                    slot_offset += size as i64;
                    continue;
                }
                (None, Some(TrackedAccess::Store(addr))) if !pair => {
                    format!("*({} *){}", c_type(size), self.address_expr(addr))
                }
                _ => self.raw_memory(base, index, relative, extend, size),
            };

            if instr.is_load() {
                state.forget(*reg);
                lines.push(format!("{} = {};", reg, location));
            } else {
                let value = if reg.is_zero_register() { "0".to_string() } else { reg.to_string() };
                lines.push(format!("{} = {};", location, value));
            }
            slot_offset += size as i64;
        }

        if mode == IndexMode::PostIndex {
            lines.push(format!("{} += {};", base, number(offset)));
        }
        lines
    }

    fn raw_memory(
        &self,
        base: Register,
        index: Option<Register>,
        offset: i64,
        extend: Option<(ExtendType, u8)>,
        size: u8,
    ) -> String {
        let address = match (index, offset) {
            (Some(ix), _) => match extend {
                Some((_, amount)) if amount > 0 => format!("({} + ({} << {}))", base, ix, amount),
                _ => format!("({} + {})", base, ix),
            },
            (None, 0) => base.to_string(),
            (None, off) if off < 0 => format!("({} - 0x{:x})", base, off.unsigned_abs()),
            (None, off) => format!("({} + 0x{:x})", base, off),
        };
        format!("*({} *){}", c_type(size), address)
    }

    fn data_processing(
        &self,
        instr: &Instruction,
        stack: &StackFrameTracker,
        state: &mut BlockState,
        access: Option<TrackedAccess>,
    ) -> Vec<String> {
        let Some(rd) = instr.destination_register() else {
            return vec![format!("// {}", instr.text())];
        };
        state.forget(rd);
        let srcs = self.sources(&instr.operands[1..]);
        let condition = instr.condition.or_else(|| {
            instr.operands.iter().find_map(|op| match op.op_type {
                OperandType::Condition(c) => Some(c),
                _ => None,
            })
        });
        let flags = state.flags.clone();
        let cond_text = || condition.map_or_else(|| "cond".to_string(), |c| self.condition_expr(flags.as_ref(), c));

        let computed = match (instr.opcode, access) {
            (Opcode::ADD | Opcode::SUB, Some(TrackedAccess::Computed(addr))) => Some(self.address_expr(addr)),
            (Opcode::ADD | Opcode::SUB, _) => self.frame_address(instr, stack),
            _ => None,
        };

        let value = if let Some(address) = computed {
            address
        } else {
            match (instr.opcode, srcs.as_slice()) {
                (Opcode::MOV | Opcode::MOVZ | Opcode::MOVN | Opcode::FMOV, [src, ..]) => src.clone(),
                (Opcode::MOVK, _) => match state.tracker.value(rd) {
                    Some(known) => format!("0x{:x}", known),
                    None => {
                        let chunk = instr.immediate_value().unwrap_or(0) as u64;
                        let shift = instr
                            .operands
                            .iter()
                            .find_map(|op| match op.op_type {
                                OperandType::Shift { amount, .. } => Some(amount as u32),
                                _ => None,
                            })
                            .unwrap_or(0);
                        format!("({} & ~0x{:x}) | 0x{:x}", rd, 0xffffu64 << shift, chunk)
                    }
                },
                (Opcode::NEG, [a, ..]) => format!("-{}", a),
                (Opcode::MVN, [a, ..]) => format!("~{}", a),
                (Opcode::MADD, [a, b, c]) => format!("{} + {} * {}", c, a, b),
                (Opcode::MSUB, [a, b, c]) => format!("{} - {} * {}", c, a, b),
                (Opcode::CSET, _) => format!("({}) ? 1 : 0", cond_text()),
                (Opcode::CSETM, _) => format!("({}) ? -1 : 0", cond_text()),
                (Opcode::CSEL, [a, b, ..]) => format!("({}) ? {} : {}", cond_text(), a, b),
                (Opcode::CSINC, [a, b, ..]) => format!("({}) ? {} : {} + 1", cond_text(), a, b),
                (Opcode::CSINV, [a, b, ..]) => format!("({}) ? {} : ~{}", cond_text(), a, b),
                (Opcode::CSNEG, [a, b, ..]) => format!("({}) ? {} : -{}", cond_text(), a, b),
                (Opcode::CINC, [a, ..]) => format!("({}) ? {} + 1 : {}", cond_text(), a, a),
                (Opcode::CINV, [a, ..]) => format!("({}) ? ~{} : {}", cond_text(), a, a),
                (Opcode::CNEG, [a, ..]) => format!("({}) ? -{} : {}", cond_text(), a, a),
                (opcode, srcs) => match (binary_operator(opcode), srcs) {
                    (Some(op), [a, b]) => format!("{} {} {}", a, op, b),
                    _ => format!("{}({})", instr.mnemonic, srcs.join(", ")),
                },
            }
        };

        match (instr.opcode, srcs.as_slice()) {
            (Opcode::SUBS, [a, b]) => state.flags = Some(Flags::Compare(a.clone(), b.clone())),
            (Opcode::ADDS, [a, b]) => state.flags = Some(Flags::Compare(a.clone(), negate(b))),
            (Opcode::ANDS, [a, b]) => state.flags = Some(Flags::Test(a.clone(), b.clone())),
            _ => {}
        }

        vec![format!("{} = {};", rd, value)]
    }

    /// `&var` for `add xN, sp|x29, #off` landing on a tracked slot.
    fn frame_address(&self, instr: &Instruction, stack: &StackFrameTracker) -> Option<String> {
        let base = instr.register_operand(1)?;
        let imm = instr.immediate_value()?;
        let offset = if instr.opcode == Opcode::SUB { -imm } else { imm };
        stack.variable_for_memory(base, offset).map(|v| format!("&{}", v.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::decode_all;
    use crate::container::testing::{words_to_bytes, MachOBuilder, IMAGE_BASE};
    use crate::container::MachOContainer;
    use crate::objc::ObjCMetadata;
    use std::sync::Arc;

    const TEXT: u64 = IMAGE_BASE + 0x1000;
    const CSTRING: u64 = IMAGE_BASE + 0x2000;
    const DATA: u64 = IMAGE_BASE + 0x4000;

    const NOP: u32 = 0xd503201f;
    const RET: u32 = 0xd65f03c0;

    fn setup(words: &[u32], symbols: &[(&str, u64)], objc: ObjCMetadata) -> (SymbolResolver, StringMap) {
        let mut builder = MachOBuilder::new()
            .text(TEXT, words)
            .cstrings(CSTRING, &["hello"])
            .section("__DATA", "__objc_selrefs", DATA, vec![0u8; 0x20]);
        for (name, addr) in symbols {
            builder = builder.symbol(name, *addr, true);
        }
        let container = Arc::new(MachOContainer::from_bytes(builder.build()).unwrap());
        let strings = StringMap::from_container(&container);
        (SymbolResolver::new(container, Arc::new(objc)), strings)
    }

    fn render(resolver: &SymbolResolver, strings: &StringMap, words: &[u32], start: u64, count: usize) -> String {
        let instructions = decode_all(&words_to_bytes(&words[..count]), start);
        let mut function = DetectedFunction::new(start, start + count as u64 * 4);
        function.name = resolver.resolve_address(start).is_resolved().then(|| resolver.format_address(start));
        PseudoCodeGenerator::new(resolver, strings).generate_function(&function, &instructions)
    }

    #[test]
    fn test_branches_calls_and_strings() {
        let words = [
            0xa9bf7bfd, // stp x29, x30, [sp, #-0x10]!
            0x910003fd, // mov x29, sp
            0xb0000000, // adrp x0, CSTRING page
            0x91000000, // add x0, x0, #0
            0x94000008, // bl leaf
            0xb4000060, // cbz x0, +0xc
            0x52800020, // mov w0, #1
            0x14000002, // b +0x8
            0x52800000, // mov w0, #0
            0xa8c17bfd, // ldp x29, x30, [sp], #0x10
            RET,
            NOP,
            RET, // leaf
        ];
        let (resolver, strings) = setup(&words, &[("_main", TEXT), ("_leaf", TEXT + 0x30)], ObjCMetadata::default());
        let code = render(&resolver, &strings, &words, TEXT, 11);

        assert!(code.contains("int64_t main(void) {"), "{}", code);
        assert!(code.contains("x0 = \"hello\";"), "{}", code);
        assert!(code.contains("x0 = leaf(x0);"), "{}", code);
        assert!(code.contains(&format!("if (x0 == 0) goto loc_{:x};", TEXT + 0x20)), "{}", code);
        assert!(code.contains(&format!("goto loc_{:x};", TEXT + 0x24)), "{}", code);
        assert!(code.contains(&format!("loc_{:x}:", TEXT + 0x20)), "{}", code);
        assert!(code.contains("w0 = 1;"), "{}", code);
        assert!(code.contains("return x0;"), "{}", code);
        assert!(!code.contains("x29"), "{}", code);
        assert_eq!(code.matches('{').count(), code.matches('}').count());
    }

    #[test]
    fn test_stack_variables_replace_memory_operands() {
        let words = [
            0xd10083ff, // sub sp, sp, #0x20
            0xa9017bfd, // stp x29, x30, [sp, #0x10]
            0x910043fd, // add x29, sp, #0x10
            0xf90007e0, // str x0, [sp, #0x8]
            0xf94007e1, // ldr x1, [sp, #0x8]
            0xf9400022, // ldr x2, [x1]
            0xa9417bfd, // ldp x29, x30, [sp, #0x10]
            0x910083ff, // add sp, sp, #0x20
            RET,
        ];
        let (resolver, strings) = setup(&words, &[], ObjCMetadata::default());
        let code = render(&resolver, &strings, &words, TEXT, words.len());

        assert!(code.contains(&format!("int64_t sub_{:x}(int64_t x0) {{", TEXT)), "{}", code);
        assert!(code.contains("int64_t var_8; // [fp - 0x8]"), "{}", code);
        assert!(code.contains("var_8 = x0;"), "{}", code);
        assert!(code.contains("x1 = var_8;"), "{}", code);
        assert!(code.contains("x2 = *(uint64_t *)x1;"), "{}", code);
        assert!(!code.contains("sp"), "{}", code);
    }

    #[test]
    fn test_pre_indexed_pair_names_both_slots() {
        let words = [
            0xa9bf07e0, // stp x0, x1, [sp, #-0x10]!
            0xf94007e2, // ldr x2, [sp, #0x8]
            0x910043ff, // add sp, sp, #0x10
            RET,
        ];
        let (resolver, strings) = setup(&words, &[], ObjCMetadata::default());
        let code = render(&resolver, &strings, &words, TEXT, words.len());

        assert!(code.contains("var_0 = x0;"), "{}", code);
        assert!(code.contains("var_8 = x1;"), "{}", code);
        assert!(code.contains("x2 = var_8;"), "{}", code);
    }

    #[test]
    fn test_objc_names_become_identifiers() {
        assert_eq!(c_identifier("-[Foo bar:baz:]"), "Foo_bar_baz");
        assert_eq!(c_identifier("+[NSObject new]"), "NSObject_new");
        assert_eq!(c_identifier("sub_100003f20"), "sub_100003f20");
        assert_eq!(c_identifier("ns::Widget::draw()"), "ns_Widget_draw");
        assert_eq!(c_identifier("1up"), "_1up");
        assert_eq!(c_identifier("[]"), "sub");

        let words = [RET];
        let (resolver, strings) = setup(&words, &[], ObjCMetadata::default());
        let instructions = decode_all(&words_to_bytes(&words), TEXT);
        let mut function = DetectedFunction::new(TEXT, TEXT + 4);
        function.name = Some("-[View layout]".to_string());
        let code = PseudoCodeGenerator::new(&resolver, &strings).generate_function(&function, &instructions);

        assert!(code.starts_with(&format!("// -[View layout] @ 0x{:x}", TEXT)), "{}", code);
        assert!(code.contains("int64_t View_layout(void) {"), "{}", code);
    }

    #[test]
    fn test_objc_msgsend_selector_annotation() {
        let mut words = vec![NOP; 0x11];
        words[0] = 0xf0000008; // adrp x8, DATA page
        words[1] = 0xf9400901; // ldr x1, [x8, #0x10]
        words[2] = 0x9400000e; // bl objc_msgSend
        words[3] = RET;
        words[0x10] = RET;

        let mut objc = ObjCMetadata::default();
        objc.selector_refs.insert(DATA + 0x10, "draw".to_string());
        let (resolver, strings) = setup(&words, &[("_objc_msgSend", TEXT + 0x40)], objc);
        let code = render(&resolver, &strings, &words, TEXT, 4);

        assert!(code.contains("x1 = @selector(draw);"), "{}", code);
        assert!(code.contains("x0 = objc_msgSend(x0, x1); // [x0 draw]"), "{}", code);
    }

    #[test]
    fn test_unresolved_input_still_renders() {
        let words = [0xffffffff, 0xd63f0100, RET]; // garbage ; blr x8 ; ret
        let (resolver, strings) = setup(&words, &[], ObjCMetadata::default());
        let instructions = decode_all(&words_to_bytes(&words), TEXT);
        let code = PseudoCodeGenerator::new(&resolver, &strings).pseudo_code_for_range(&instructions);

        assert!(code.contains(&format!("int64_t range_{:x}(", TEXT)), "{}", code);
        assert!(code.contains("// undecoded"), "{}", code);
        assert!(code.contains("(*x8)()"), "{}", code);
        assert!(code.trim_end().ends_with('}'));
    }
}
