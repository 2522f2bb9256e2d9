// Tue Jan 13 2026 - Alex

use crate::analysis::arm64::{
    Condition, ExtendType, IndexMode, Instruction, Opcode, Operand, OperandType, Register, RegisterSize,
    ShiftType,
};

/// Table-driven A64 decoder. Every 32-bit word decodes to an `Instruction`;
/// encodings outside the modelled groups come back as `Opcode::Unknown`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm64Decoder;

#[inline]
fn bit(raw: u32, n: u32) -> bool {
    (raw >> n) & 1 == 1
}

#[inline]
fn field(raw: u32, lo: u32, width: u32) -> u32 {
    (raw >> lo) & ((1u32 << width) - 1)
}

#[inline]
fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

#[inline]
fn reg(r: Register) -> Operand {
    Operand::register(r)
}

#[inline]
fn imm(value: i64) -> Operand {
    Operand::immediate(value)
}

fn build(address: u64, raw: u32, opcode: Opcode, mnemonic: impl Into<String>, operands: Vec<Operand>) -> Option<Instruction> {
    Some(Instruction::new(address, raw, opcode, mnemonic, operands))
}

/// `DecodeBitMasks` for logical immediates; `None` for reserved patterns.
fn decode_bit_masks(n: u32, imms: u32, immr: u32, datasize: u32) -> Option<u64> {
    let combined = (n << 6) | (!imms & 0x3f);
    if combined == 0 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if len < 1 {
        return None;
    }
    let esize = 1u32 << len;
    if esize > datasize {
        return None;
    }
    let levels = esize - 1;
    let s = imms & levels;
    let r = immr & levels;
    if s == levels {
        return None;
    }
    let emask = if esize == 64 { u64::MAX } else { (1u64 << esize) - 1 };
    let welem = (1u64 << (s + 1)) - 1;
    let elem = if r == 0 { welem } else { ((welem >> r) | (welem << (esize - r))) & emask };
    let mut result = 0u64;
    let mut pos = 0;
    while pos < datasize {
        result |= elem << pos;
        pos += esize;
    }
    Some(result)
}

fn vfp_expand_imm(imm8: u32) -> f64 {
    let sign = if imm8 & 0x80 != 0 { -1.0 } else { 1.0 };
    let exp = ((imm8 >> 4) & 7) ^ 4;
    let frac = (imm8 & 0xf) as f64;
    sign * (16.0 + frac) / 16.0 * 2f64.powi(exp as i32 - 3)
}

fn prefetch_op(rt: u32) -> String {
    let kind = match (rt >> 3) & 3 {
        0 => "pld",
        1 => "pli",
        2 => "pst",
        _ => return format!("#{}", rt),
    };
    let level = (rt >> 1) & 3;
    if level == 3 {
        return format!("#{}", rt);
    }
    let policy = if rt & 1 == 1 { "strm" } else { "keep" };
    format!("{}l{}{}", kind, level + 1, policy)
}

fn barrier_option(crm: u32) -> Option<&'static str> {
    Some(match crm {
        1 => "oshld",
        2 => "oshst",
        3 => "osh",
        5 => "nshld",
        6 => "nshst",
        7 => "nsh",
        9 => "ishld",
        10 => "ishst",
        11 => "ish",
        13 => "ld",
        14 => "st",
        15 => "sy",
        _ => return None,
    })
}

fn fp_size(ftype: u32) -> Option<RegisterSize> {
    match ftype {
        0 => Some(RegisterSize::Word),
        1 => Some(RegisterSize::Double),
        3 => Some(RegisterSize::Half),
        _ => None,
    }
}

/// Base name, size suffix, opcode, register and access width for a single-register load/store.
struct LoadStoreForm {
    base: &'static str,
    suffix: &'static str,
    opcode: Opcode,
    reg: Register,
    bytes: u8,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AddressingForm {
    Scaled,
    Unscaled,
    Unprivileged,
    Indexed,
}

impl Arm64Decoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, address: u64, raw: u32) -> Instruction {
        let decoded = match (raw >> 25) & 0xf {
            0b0000 => self.decode_reserved(address, raw),
            0b1000 | 0b1001 => self.decode_data_processing_imm(address, raw),
            0b1010 | 0b1011 => self.decode_branch_exception_system(address, raw),
            0b0100 | 0b0110 | 0b1100 | 0b1110 => self.decode_loads_stores(address, raw),
            0b0101 | 0b1101 => self.decode_data_processing_reg(address, raw),
            0b0111 | 0b1111 => self.decode_simd_fp(address, raw),
            _ => None,
        };
        decoded.unwrap_or_else(|| Instruction::unknown(address, raw))
    }

    pub fn is_valid(&self, raw: u32) -> bool {
        !self.decode(0, raw).is_unknown()
    }

    fn decode_reserved(&self, address: u64, raw: u32) -> Option<Instruction> {
        if raw >> 16 != 0 {
            return None;
        }
        build(address, raw, Opcode::UDF, "udf", vec![Operand::count(raw & 0xffff)])
    }

    fn decode_data_processing_imm(&self, address: u64, raw: u32) -> Option<Instruction> {
        match field(raw, 23, 3) {
            0b000 | 0b001 => self.decode_pc_rel_addressing(address, raw),
            0b010 => self.decode_add_sub_imm(address, raw),
            0b100 => self.decode_logical_imm(address, raw),
            0b101 => self.decode_move_wide_imm(address, raw),
            0b110 => self.decode_bitfield(address, raw),
            0b111 => self.decode_extract(address, raw),
            _ => None,
        }
    }

    fn decode_pc_rel_addressing(&self, address: u64, raw: u32) -> Option<Instruction> {
        let rd = Register::gp(raw, true);
        let immlo = field(raw, 29, 2) as u64;
        let immhi = field(raw, 5, 19) as u64;
        let offset = sign_extend((immhi << 2) | immlo, 21);
        if bit(raw, 31) {
            let target = (address & !0xfff).wrapping_add((offset << 12) as u64);
            build(address, raw, Opcode::ADRP, "adrp", vec![reg(rd), Operand::address(target)])
        } else {
            let target = address.wrapping_add(offset as u64);
            build(address, raw, Opcode::ADR, "adr", vec![reg(rd), Operand::address(target)])
        }
    }

    fn decode_add_sub_imm(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let op = bit(raw, 30);
        let s = bit(raw, 29);
        let shifted = bit(raw, 22);
        let imm12 = field(raw, 10, 12) as i64;
        let rn_bits = field(raw, 5, 5);
        let rd_bits = field(raw, 0, 5);
        let rn = Register::gp_or_sp(rn_bits, sf);

        let mut immediate = vec![imm(imm12)];
        if shifted {
            immediate.push(Operand::shift(ShiftType::LSL, 12));
        }

        if s && rd_bits == 31 {
            let (opcode, name) = if op { (Opcode::CMP, "cmp") } else { (Opcode::CMN, "cmn") };
            let mut operands = vec![reg(rn)];
            operands.extend(immediate);
            return build(address, raw, opcode, name, operands);
        }

        let rd = if s { Register::gp(rd_bits, sf) } else { Register::gp_or_sp(rd_bits, sf) };
        if !op && !s && imm12 == 0 && !shifted && (rd_bits == 31 || rn_bits == 31) {
            return build(address, raw, Opcode::MOV, "mov", vec![reg(rd), reg(rn)]);
        }

        let (opcode, name) = match (op, s) {
            (false, false) => (Opcode::ADD, "add"),
            (false, true) => (Opcode::ADDS, "adds"),
            (true, false) => (Opcode::SUB, "sub"),
            (true, true) => (Opcode::SUBS, "subs"),
        };
        let mut operands = vec![reg(rd), reg(rn)];
        operands.extend(immediate);
        build(address, raw, opcode, name, operands)
    }

    fn decode_logical_imm(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let opc = field(raw, 29, 2);
        let n = field(raw, 22, 1);
        if !sf && n == 1 {
            return None;
        }
        let datasize = if sf { 64 } else { 32 };
        let value = decode_bit_masks(n, field(raw, 10, 6), field(raw, 16, 6), datasize)?;
        let rn_bits = field(raw, 5, 5);
        let rd_bits = field(raw, 0, 5);
        let rn = Register::gp(rn_bits, sf);
        let mask = Operand::bitmask(value);

        match opc {
            0 => build(address, raw, Opcode::AND, "and", vec![reg(Register::gp_or_sp(rd_bits, sf)), reg(rn), mask]),
            1 if rn_bits == 31 => build(address, raw, Opcode::MOV, "mov", vec![reg(Register::gp_or_sp(rd_bits, sf)), mask]),
            1 => build(address, raw, Opcode::ORR, "orr", vec![reg(Register::gp_or_sp(rd_bits, sf)), reg(rn), mask]),
            2 => build(address, raw, Opcode::EOR, "eor", vec![reg(Register::gp_or_sp(rd_bits, sf)), reg(rn), mask]),
            _ if rd_bits == 31 => build(address, raw, Opcode::TST, "tst", vec![reg(rn), mask]),
            _ => build(address, raw, Opcode::ANDS, "ands", vec![reg(Register::gp(rd_bits, sf)), reg(rn), mask]),
        }
    }

    fn decode_move_wide_imm(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let opc = field(raw, 29, 2);
        let hw = field(raw, 21, 2);
        if opc == 1 || (!sf && hw >= 2) {
            return None;
        }
        let imm16 = field(raw, 5, 16) as u64;
        let shift = hw * 16;
        let rd = reg(Register::gp(raw, sf));
        let explicit_shift = |name: &'static str, opcode: Opcode| {
            let mut operands = vec![rd.clone(), imm(imm16 as i64)];
            if shift != 0 {
                operands.push(Operand::shift(ShiftType::LSL, shift as u8));
            }
            build(address, raw, opcode, name, operands)
        };

        match opc {
            0 if imm16 == 0 && hw != 0 => explicit_shift("movn", Opcode::MOVN),
            0 => {
                let inverted = !(imm16 << shift);
                let value = if sf { inverted as i64 } else { inverted as u32 as i32 as i64 };
                build(address, raw, Opcode::MOV, "mov", vec![rd.clone(), imm(value)])
            }
            2 if imm16 == 0 && hw != 0 => explicit_shift("movz", Opcode::MOVZ),
            2 => build(address, raw, Opcode::MOV, "mov", vec![rd.clone(), imm((imm16 << shift) as i64)]),
            _ => explicit_shift("movk", Opcode::MOVK),
        }
    }

    fn decode_bitfield(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let opc = field(raw, 29, 2);
        let n = bit(raw, 22);
        let immr = field(raw, 16, 6);
        let imms = field(raw, 10, 6);
        if opc == 3 || sf != n || (!sf && (immr >= 32 || imms >= 32)) {
            return None;
        }
        let width = if sf { 64 } else { 32 };
        let rn_bits = field(raw, 5, 5);
        let rd = reg(Register::gp(raw, sf));
        let rn = reg(Register::gp(rn_bits, sf));
        let count = Operand::count;

        match opc {
            0 => {
                if imms == width - 1 {
                    build(address, raw, Opcode::ASR, "asr", vec![rd, rn, count(immr)])
                } else if imms < immr {
                    build(address, raw, Opcode::Bitfield, "sbfiz", vec![rd, rn, count(width - immr), count(imms + 1)])
                } else if immr == 0 && (imms == 7 || imms == 15 || (imms == 31 && sf)) {
                    let name = match imms {
                        7 => "sxtb",
                        15 => "sxth",
                        _ => "sxtw",
                    };
                    build(address, raw, Opcode::Extend, name, vec![rd, reg(Register::gp(rn_bits, false))])
                } else {
                    build(address, raw, Opcode::Bitfield, "sbfx", vec![rd, rn, count(immr), count(imms - immr + 1)])
                }
            }
            1 => {
                if imms < immr {
                    if rn_bits == 31 {
                        build(address, raw, Opcode::Bitfield, "bfc", vec![rd, count(width - immr), count(imms + 1)])
                    } else {
                        build(address, raw, Opcode::Bitfield, "bfi", vec![rd, rn, count(width - immr), count(imms + 1)])
                    }
                } else {
                    build(address, raw, Opcode::Bitfield, "bfxil", vec![rd, rn, count(immr), count(imms - immr + 1)])
                }
            }
            _ => {
                if imms != width - 1 && imms + 1 == immr {
                    build(address, raw, Opcode::LSL, "lsl", vec![rd, rn, count(width - 1 - imms)])
                } else if imms == width - 1 {
                    build(address, raw, Opcode::LSR, "lsr", vec![rd, rn, count(immr)])
                } else if imms < immr {
                    build(address, raw, Opcode::Bitfield, "ubfiz", vec![rd, rn, count(width - immr), count(imms + 1)])
                } else if !sf && immr == 0 && (imms == 7 || imms == 15) {
                    let name = if imms == 7 { "uxtb" } else { "uxth" };
                    build(address, raw, Opcode::Extend, name, vec![rd, rn])
                } else {
                    build(address, raw, Opcode::Bitfield, "ubfx", vec![rd, rn, count(immr), count(imms - immr + 1)])
                }
            }
        }
    }

    fn decode_extract(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let imms = field(raw, 10, 6);
        if field(raw, 29, 2) != 0 || bit(raw, 21) || sf != bit(raw, 22) || (!sf && imms >= 32) {
            return None;
        }
        let rm_bits = field(raw, 16, 5);
        let rn_bits = field(raw, 5, 5);
        let rd = reg(Register::gp(raw, sf));
        let rn = reg(Register::gp(rn_bits, sf));
        if rn_bits == rm_bits {
            return build(address, raw, Opcode::ROR, "ror", vec![rd, rn, Operand::count(imms)]);
        }
        let rm = reg(Register::gp(rm_bits, sf));
        build(address, raw, Opcode::Extract, "extr", vec![rd, rn, rm, Operand::count(imms)])
    }

    fn decode_branch_exception_system(&self, address: u64, raw: u32) -> Option<Instruction> {
        if raw & 0x7c00_0000 == 0x1400_0000 {
            self.decode_unconditional_branch_imm(address, raw)
        } else if raw & 0xfe00_0000 == 0x5400_0000 {
            self.decode_conditional_branch(address, raw)
        } else if raw & 0xff00_0000 == 0xd400_0000 {
            self.decode_exception_generation(address, raw)
        } else if raw & 0xffc0_0000 == 0xd500_0000 {
            self.decode_system(address, raw)
        } else if raw & 0xfe00_0000 == 0xd600_0000 {
            self.decode_unconditional_branch_register(address, raw)
        } else if raw & 0x7e00_0000 == 0x3400_0000 {
            self.decode_compare_and_branch(address, raw)
        } else if raw & 0x7e00_0000 == 0x3600_0000 {
            self.decode_test_and_branch(address, raw)
        } else {
            None
        }
    }

    fn decode_unconditional_branch_imm(&self, address: u64, raw: u32) -> Option<Instruction> {
        let offset = sign_extend((field(raw, 0, 26) as u64) << 2, 28);
        let target = address.wrapping_add(offset as u64);
        if bit(raw, 31) {
            build(address, raw, Opcode::BL, "bl", vec![Operand::address(target)])
        } else {
            build(address, raw, Opcode::B, "b", vec![Operand::address(target)])
        }
    }

    fn decode_conditional_branch(&self, address: u64, raw: u32) -> Option<Instruction> {
        if bit(raw, 24) {
            return None;
        }
        let cond = Condition::from_code(raw & 0xf);
        let offset = sign_extend((field(raw, 5, 19) as u64) << 2, 21);
        let target = address.wrapping_add(offset as u64);
        let prefix = if bit(raw, 4) { "bc" } else { "b" };
        build(address, raw, Opcode::Bcc, format!("{}.{}", prefix, cond), vec![Operand::address(target)])
            .map(|insn| insn.with_condition(cond))
    }

    fn decode_exception_generation(&self, address: u64, raw: u32) -> Option<Instruction> {
        if field(raw, 2, 3) != 0 {
            return None;
        }
        let imm16 = imm(field(raw, 5, 16) as i64);
        let (opcode, name) = match (field(raw, 21, 3), field(raw, 0, 2)) {
            (0, 1) => (Opcode::SVC, "svc"),
            (0, 2) => (Opcode::SVC, "hvc"),
            (0, 3) => (Opcode::SVC, "smc"),
            (1, 0) => (Opcode::BRK, "brk"),
            (2, 0) => (Opcode::HLT, "hlt"),
            (5, 1) => (Opcode::SVC, "dcps1"),
            (5, 2) => (Opcode::SVC, "dcps2"),
            (5, 3) => (Opcode::SVC, "dcps3"),
            _ => return None,
        };
        build(address, raw, opcode, name, vec![imm16])
    }

    fn decode_system(&self, address: u64, raw: u32) -> Option<Instruction> {
        let l = bit(raw, 21);
        let op0 = field(raw, 19, 2);
        let op1 = field(raw, 16, 3);
        let crn = field(raw, 12, 4);
        let crm = field(raw, 8, 4);
        let op2 = field(raw, 5, 3);
        let rt = field(raw, 0, 5);

        match (l, op0) {
            (false, 0) if crn == 2 && rt == 31 => self.decode_hint(address, raw, (crm << 3) | op2),
            (false, 0) if crn == 3 && rt == 31 => self.decode_barrier(address, raw, crm, op2),
            (false, 0) if crn == 4 && rt == 31 => {
                let pstate = match (op1, op2) {
                    (0, 3) => "uao".to_string(),
                    (0, 4) => "pan".to_string(),
                    (0, 5) => "spsel".to_string(),
                    (3, 1) => "ssbs".to_string(),
                    (3, 2) => "dit".to_string(),
                    (3, 6) => "daifset".to_string(),
                    (3, 7) => "daifclr".to_string(),
                    _ => format!("pstate_{}_{}", op1, op2),
                };
                build(address, raw, Opcode::MSR, "msr", vec![Operand::symbolic(pstate), imm(crm as i64)])
            }
            (false, 1) => {
                let xt = reg(Register::gp(rt, true));
                let named = match (op1, crn, crm, op2) {
                    (3, 7, 4, 1) => Some(("dc", "zva")),
                    (3, 7, 10, 1) => Some(("dc", "cvac")),
                    (3, 7, 11, 1) => Some(("dc", "cvau")),
                    (3, 7, 14, 1) => Some(("dc", "civac")),
                    (0, 7, 6, 1) => Some(("dc", "ivac")),
                    (3, 7, 5, 1) => Some(("ic", "ivau")),
                    (0, 7, 5, 0) if rt == 31 => Some(("ic", "iallu")),
                    _ => None,
                };
                match named {
                    Some((name, op)) if rt == 31 && name == "ic" => {
                        build(address, raw, Opcode::SYS, name, vec![Operand::symbolic(op)])
                    }
                    Some((name, op)) => build(address, raw, Opcode::SYS, name, vec![Operand::symbolic(op), xt]),
                    None => build(
                        address,
                        raw,
                        Opcode::SYS,
                        "sys",
                        vec![
                            Operand::count(op1),
                            Operand::symbolic(format!("c{}", crn)),
                            Operand::symbolic(format!("c{}", crm)),
                            Operand::count(op2),
                            xt,
                        ],
                    ),
                }
            }
            (true, 1) => build(
                address,
                raw,
                Opcode::SYS,
                "sysl",
                vec![
                    reg(Register::gp(rt, true)),
                    Operand::count(op1),
                    Operand::symbolic(format!("c{}", crn)),
                    Operand::symbolic(format!("c{}", crm)),
                    Operand::count(op2),
                ],
            ),
            (_, 2) | (_, 3) => {
                let encoding = ((op0 << 14) | (op1 << 11) | (crn << 7) | (crm << 3) | op2) as u16;
                let xt = reg(Register::gp(rt, true));
                if l {
                    build(address, raw, Opcode::MRS, "mrs", vec![xt, Operand::system_register(encoding)])
                } else {
                    build(address, raw, Opcode::MSR, "msr", vec![Operand::system_register(encoding), xt])
                }
            }
            _ => None,
        }
    }

    fn decode_hint(&self, address: u64, raw: u32, selector: u32) -> Option<Instruction> {
        let (opcode, name, operand) = match selector {
            0 => (Opcode::Hint, "nop", None),
            1 => (Opcode::Hint, "yield", None),
            2 => (Opcode::Hint, "wfe", None),
            3 => (Opcode::Hint, "wfi", None),
            4 => (Opcode::Hint, "sev", None),
            5 => (Opcode::Hint, "sevl", None),
            6 => (Opcode::Hint, "dgh", None),
            7 => (Opcode::Pac, "xpaclri", None),
            8 => (Opcode::Pac, "pacia1716", None),
            10 => (Opcode::Pac, "pacib1716", None),
            12 => (Opcode::Pac, "autia1716", None),
            14 => (Opcode::Pac, "autib1716", None),
            16 => (Opcode::Hint, "esb", None),
            17 => (Opcode::Hint, "psb", Some("csync")),
            18 => (Opcode::Hint, "tsb", Some("csync")),
            20 => (Opcode::Hint, "csdb", None),
            24 => (Opcode::Pac, "paciaz", None),
            25 => (Opcode::Pac, "paciasp", None),
            26 => (Opcode::Pac, "pacibz", None),
            27 => (Opcode::Pac, "pacibsp", None),
            28 => (Opcode::Pac, "autiaz", None),
            29 => (Opcode::Pac, "autiasp", None),
            30 => (Opcode::Pac, "autibz", None),
            31 => (Opcode::Pac, "autibsp", None),
            32 => (Opcode::Hint, "bti", None),
            34 => (Opcode::Hint, "bti", Some("c")),
            36 => (Opcode::Hint, "bti", Some("j")),
            38 => (Opcode::Hint, "bti", Some("jc")),
            other => return build(address, raw, Opcode::Hint, "hint", vec![Operand::count(other)]),
        };
        build(address, raw, opcode, name, operand.map(Operand::symbolic).into_iter().collect())
    }

    fn decode_barrier(&self, address: u64, raw: u32, crm: u32, op2: u32) -> Option<Instruction> {
        let option = |crm: u32| match barrier_option(crm) {
            Some(name) => Operand::symbolic(name),
            None => imm(crm as i64),
        };
        match op2 {
            2 if crm == 15 => build(address, raw, Opcode::Barrier, "clrex", vec![]),
            2 => build(address, raw, Opcode::Barrier, "clrex", vec![imm(crm as i64)]),
            4 if crm == 0 => build(address, raw, Opcode::Barrier, "ssbb", vec![]),
            4 if crm == 4 => build(address, raw, Opcode::Barrier, "pssbb", vec![]),
            4 => build(address, raw, Opcode::Barrier, "dsb", vec![option(crm)]),
            5 => build(address, raw, Opcode::Barrier, "dmb", vec![option(crm)]),
            6 if crm == 15 => build(address, raw, Opcode::Barrier, "isb", vec![]),
            6 => build(address, raw, Opcode::Barrier, "isb", vec![imm(crm as i64)]),
            7 => build(address, raw, Opcode::Barrier, "sb", vec![]),
            _ => None,
        }
    }

    fn decode_unconditional_branch_register(&self, address: u64, raw: u32) -> Option<Instruction> {
        let opc = field(raw, 21, 4);
        let op3 = field(raw, 10, 6);
        let rn = field(raw, 5, 5);
        let op4 = field(raw, 0, 5);
        if field(raw, 16, 5) != 0x1f {
            return None;
        }
        let xn = reg(Register::gp(rn, true));
        let keyed = |a: &'static str, b: &'static str| if op3 == 2 { a } else { b };

        match (opc, op3) {
            (0, 0) if op4 == 0 => build(address, raw, Opcode::BR, "br", vec![xn]),
            (1, 0) if op4 == 0 => build(address, raw, Opcode::BLR, "blr", vec![xn]),
            (2, 0) if op4 == 0 && rn == 30 => build(address, raw, Opcode::RET, "ret", vec![]),
            (2, 0) if op4 == 0 => build(address, raw, Opcode::RET, "ret", vec![xn]),
            (0, 2 | 3) if op4 == 31 => build(address, raw, Opcode::BR, keyed("braaz", "brabz"), vec![xn]),
            (1, 2 | 3) if op4 == 31 => build(address, raw, Opcode::BLR, keyed("blraaz", "blrabz"), vec![xn]),
            (2, 2 | 3) if rn == 31 && op4 == 31 => build(address, raw, Opcode::RET, keyed("retaa", "retab"), vec![]),
            (4, 0) if rn == 31 && op4 == 0 => build(address, raw, Opcode::ERET, "eret", vec![]),
            (4, 2 | 3) if rn == 31 && op4 == 31 => build(address, raw, Opcode::ERET, keyed("eretaa", "eretab"), vec![]),
            (5, 0) if rn == 31 && op4 == 0 => build(address, raw, Opcode::ERET, "drps", vec![]),
            (8, 2 | 3) => build(
                address,
                raw,
                Opcode::BR,
                keyed("braa", "brab"),
                vec![xn, reg(Register::gp_or_sp(op4, true))],
            ),
            (9, 2 | 3) => build(
                address,
                raw,
                Opcode::BLR,
                keyed("blraa", "blrab"),
                vec![xn, reg(Register::gp_or_sp(op4, true))],
            ),
            _ => None,
        }
    }

    fn decode_compare_and_branch(&self, address: u64, raw: u32) -> Option<Instruction> {
        let rt = reg(Register::gp(raw, bit(raw, 31)));
        let offset = sign_extend((field(raw, 5, 19) as u64) << 2, 21);
        let target = Operand::address(address.wrapping_add(offset as u64));
        if bit(raw, 24) {
            build(address, raw, Opcode::CBNZ, "cbnz", vec![rt, target])
        } else {
            build(address, raw, Opcode::CBZ, "cbz", vec![rt, target])
        }
    }

    fn decode_test_and_branch(&self, address: u64, raw: u32) -> Option<Instruction> {
        let b5 = field(raw, 31, 1);
        let bit_pos = (b5 << 5) | field(raw, 19, 5);
        let rt = reg(Register::gp(raw, b5 == 1));
        let offset = sign_extend((field(raw, 5, 14) as u64) << 2, 16);
        let target = Operand::address(address.wrapping_add(offset as u64));
        let operands = vec![rt, Operand::count(bit_pos), target];
        if bit(raw, 24) {
            build(address, raw, Opcode::TBNZ, "tbnz", operands)
        } else {
            build(address, raw, Opcode::TBZ, "tbz", operands)
        }
    }

    fn decode_loads_stores(&self, address: u64, raw: u32) -> Option<Instruction> {
        if raw & 0x3f00_0000 == 0x0800_0000 {
            self.decode_load_store_exclusive(address, raw)
        } else if raw & 0xbfbf_0000 == 0x0c00_0000 || raw & 0xbfa0_0000 == 0x0c80_0000 {
            self.decode_simd_load_store_multiple(address, raw)
        } else if raw & 0x3b00_0000 == 0x1800_0000 {
            self.decode_load_literal(address, raw)
        } else if raw & 0x3a00_0000 == 0x2800_0000 {
            self.decode_load_store_pair(address, raw)
        } else if raw & 0x3b00_0000 == 0x3900_0000 {
            self.decode_load_store_unsigned_imm(address, raw)
        } else if raw & 0x3b20_0000 == 0x3820_0000 {
            self.decode_load_store_reg_extended(address, raw)
        } else if raw & 0x3b20_0000 == 0x3800_0000 {
            self.decode_load_store_imm9(address, raw)
        } else {
            None
        }
    }

    fn decode_load_store_exclusive(&self, address: u64, raw: u32) -> Option<Instruction> {
        let size = field(raw, 30, 2);
        let o2 = bit(raw, 23);
        let l = bit(raw, 22);
        let o1 = bit(raw, 21);
        let o0 = bit(raw, 15);
        let rs = field(raw, 16, 5);
        let rt2 = field(raw, 10, 5);
        let rt = field(raw, 0, 5);
        let rn = Register::gp_or_sp(field(raw, 5, 5), true);
        let suffix = match size {
            0 => "b",
            1 => "h",
            _ => "",
        };
        let is64 = size == 3;
        let mem = Operand::memory(rn, 0, IndexMode::Offset, 1u8 << size);
        let status = reg(Register::w(rs as u8));

        match (o2, o1) {
            (false, false) if l => {
                let name = format!("ld{}xr{}", if o0 { "a" } else { "" }, suffix);
                build(address, raw, Opcode::LoadExclusive, name, vec![reg(Register::gp(rt, is64)), mem])
            }
            (false, false) => {
                let name = format!("st{}xr{}", if o0 { "l" } else { "" }, suffix);
                build(address, raw, Opcode::StoreExclusive, name, vec![status, reg(Register::gp(rt, is64)), mem])
            }
            (false, true) if size >= 2 => {
                let pair = [reg(Register::gp(rt, is64)), reg(Register::gp(rt2, is64))];
                if l {
                    let name = format!("ld{}xp", if o0 { "a" } else { "" });
                    build(address, raw, Opcode::LoadExclusive, name, vec![pair[0].clone(), pair[1].clone(), mem])
                } else {
                    let name = format!("st{}xp", if o0 { "l" } else { "" });
                    build(address, raw, Opcode::StoreExclusive, name, vec![status, pair[0].clone(), pair[1].clone(), mem])
                }
            }
            (false, true) => {
                let wide = size == 1;
                let name = format!("casp{}{}", if l { "a" } else { "" }, if o0 { "l" } else { "" });
                build(
                    address,
                    raw,
                    Opcode::Atomic,
                    name,
                    vec![
                        reg(Register::gp(rs, wide)),
                        reg(Register::gp((rs + 1) & 0x1f, wide)),
                        reg(Register::gp(rt, wide)),
                        reg(Register::gp((rt + 1) & 0x1f, wide)),
                        mem,
                    ],
                )
            }
            (true, false) if l => {
                let name = format!("{}{}", if o0 { "ldar" } else { "ldlar" }, suffix);
                build(address, raw, Opcode::Load, name, vec![reg(Register::gp(rt, is64)), mem])
            }
            (true, false) => {
                let name = format!("{}{}", if o0 { "stlr" } else { "stllr" }, suffix);
                build(address, raw, Opcode::Store, name, vec![reg(Register::gp(rt, is64)), mem])
            }
            (true, true) => {
                let name = format!("cas{}{}{}", if l { "a" } else { "" }, if o0 { "l" } else { "" }, suffix);
                build(
                    address,
                    raw,
                    Opcode::Atomic,
                    name,
                    vec![reg(Register::gp(rs, is64)), reg(Register::gp(rt, is64)), mem],
                )
            }
        }
    }

    fn decode_simd_load_store_multiple(&self, address: u64, raw: u32) -> Option<Instruction> {
        let q = bit(raw, 30);
        let load = bit(raw, 22);
        let size = field(raw, 10, 2);
        let (structure, count) = match field(raw, 12, 4) {
            0b0000 => (4, 4u8),
            0b0010 => (1, 4),
            0b0100 => (3, 3),
            0b0110 => (1, 3),
            0b0111 => (1, 1),
            0b1000 => (2, 2),
            0b1010 => (1, 2),
            _ => return None,
        };
        if size == 3 && !q && structure != 1 {
            return None;
        }
        let arrangement = match (size, q) {
            (0, false) => "8b",
            (0, true) => "16b",
            (1, false) => "4h",
            (1, true) => "8h",
            (2, false) => "2s",
            (2, true) => "4s",
            (3, false) => "1d",
            _ => "2d",
        };
        let total = count * if q { 16 } else { 8 };
        let rn = Register::gp_or_sp(field(raw, 5, 5), true);
        let mem = if bit(raw, 23) {
            let rm = field(raw, 16, 5);
            if rm == 31 {
                Operand::memory(rn, total as i64, IndexMode::PostIndex, total)
            } else {
                Operand {
                    op_type: OperandType::Memory {
                        base: rn,
                        index: Some(Register::x(rm as u8)),
                        offset: 0,
                        mode: IndexMode::PostIndex,
                        extend: None,
                    },
                    size: total,
                }
            }
        } else {
            Operand::memory(rn, 0, IndexMode::Offset, total)
        };
        let list = Operand {
            op_type: OperandType::VectorList { first: field(raw, 0, 5) as u8, count, arrangement },
            size: total,
        };
        let (opcode, prefix) = if load { (Opcode::VectorLoad, "ld") } else { (Opcode::VectorStore, "st") };
        build(address, raw, opcode, format!("{}{}", prefix, structure), vec![list, mem])
    }

    fn decode_load_literal(&self, address: u64, raw: u32) -> Option<Instruction> {
        let rt = field(raw, 0, 5);
        let offset = sign_extend((field(raw, 5, 19) as u64) << 2, 21);
        let target = Operand::address(address.wrapping_add(offset as u64));
        let (name, rt_reg, bytes) = match (bit(raw, 26), field(raw, 30, 2)) {
            (false, 0) => ("ldr", Register::w(rt as u8), 4u8),
            (false, 1) => ("ldr", Register::x(rt as u8), 8),
            (false, 2) => ("ldrsw", Register::x(rt as u8), 4),
            (false, _) => {
                return build(address, raw, Opcode::Prefetch, "prfm", vec![Operand::symbolic(prefetch_op(rt)), target]);
            }
            (true, 0) => ("ldr", Register::fp_reg(rt, RegisterSize::Word), 4),
            (true, 1) => ("ldr", Register::fp_reg(rt, RegisterSize::Double), 8),
            (true, 2) => ("ldr", Register::fp_reg(rt, RegisterSize::Quad), 16),
            _ => return None,
        };
        let mut target = target;
        target.size = bytes;
        build(address, raw, Opcode::LoadLiteral, name, vec![reg(rt_reg), target])
    }

    fn decode_load_store_pair(&self, address: u64, raw: u32) -> Option<Instruction> {
        let opc = field(raw, 30, 2);
        let vector = bit(raw, 26);
        let load = bit(raw, 22);
        let (mode, non_temporal) = match field(raw, 23, 3) {
            0 => (IndexMode::Offset, true),
            1 => (IndexMode::PostIndex, false),
            2 => (IndexMode::Offset, false),
            3 => (IndexMode::PreIndex, false),
            _ => return None,
        };
        let rt = field(raw, 0, 5);
        let rt2 = field(raw, 10, 5);
        // (fp size, 64-bit gp, scale, sign-extending)
        let (fp, wide, scale, signed) = match (vector, opc) {
            (true, 0) => (Some(RegisterSize::Word), false, 2, false),
            (true, 1) => (Some(RegisterSize::Double), false, 3, false),
            (true, 2) => (Some(RegisterSize::Quad), false, 4, false),
            (false, 0) => (None, false, 2, false),
            (false, 1) if load && !non_temporal => (None, true, 2, true),
            (false, 2) => (None, true, 3, false),
            _ => return None,
        };
        let make = |index: u32| match fp {
            Some(size) => Register::fp_reg(index, size),
            None => Register::gp(index, wide),
        };
        let offset = sign_extend(field(raw, 15, 7) as u64, 7) << scale;
        let rn = Register::gp_or_sp(field(raw, 5, 5), true);
        let mem = Operand::memory(rn, offset, mode, 1u8 << scale);
        let name = match (load, non_temporal, signed) {
            (true, _, true) => "ldpsw",
            (true, true, _) => "ldnp",
            (true, false, _) => "ldp",
            (false, true, _) => "stnp",
            (false, false, _) => "stp",
        };
        let opcode = if load { Opcode::LoadPair } else { Opcode::StorePair };
        build(address, raw, opcode, name, vec![reg(make(rt)), reg(make(rt2)), mem])
    }

    fn load_store_form(&self, size: u32, vector: bool, opc: u32, rt: u32) -> Option<LoadStoreForm> {
        let form = |base, suffix, opcode, reg: Register, bytes| LoadStoreForm { base, suffix, opcode, reg, bytes };
        if vector {
            let load = opc & 1 == 1;
            let (reg_size, bytes) = match (size, opc >= 2) {
                (0, false) => (RegisterSize::Byte, 1),
                (0, true) => (RegisterSize::Quad, 16),
                (1, false) => (RegisterSize::Half, 2),
                (2, false) => (RegisterSize::Word, 4),
                (3, false) => (RegisterSize::Double, 8),
                _ => return None,
            };
            let (base, opcode) = if load { ("ldr", Opcode::Load) } else { ("str", Opcode::Store) };
            return Some(form(base, "", opcode, Register::fp_reg(rt, reg_size), bytes));
        }
        let bytes = 1u8 << size;
        let suffix = match size {
            0 => "b",
            1 => "h",
            _ => "",
        };
        Some(match (size, opc) {
            (_, 0) => form("str", suffix, Opcode::Store, Register::gp(rt, size == 3), bytes),
            (_, 1) => form("ldr", suffix, Opcode::Load, Register::gp(rt, size == 3), bytes),
            (0 | 1, 2) => form("ldrs", suffix, Opcode::Load, Register::gp(rt, true), bytes),
            (0 | 1, _) => form("ldrs", suffix, Opcode::Load, Register::gp(rt, false), bytes),
            (2, 2) => form("ldrs", "w", Opcode::Load, Register::gp(rt, true), bytes),
            (3, 2) => form("prfm", "", Opcode::Prefetch, Register::gp(rt, true), bytes),
            _ => return None,
        })
    }

    fn load_store_mnemonic(form: &LoadStoreForm, addressing: AddressingForm) -> String {
        let base = match (form.base, addressing) {
            ("prfm", AddressingForm::Unscaled) => "prfum",
            ("str", AddressingForm::Unscaled) => "stur",
            ("ldr", AddressingForm::Unscaled) => "ldur",
            ("ldrs", AddressingForm::Unscaled) => "ldurs",
            ("str", AddressingForm::Unprivileged) => "sttr",
            ("ldr", AddressingForm::Unprivileged) => "ldtr",
            ("ldrs", AddressingForm::Unprivileged) => "ldtrs",
            (base, _) => base,
        };
        format!("{}{}", base, form.suffix)
    }

    fn finish_load_store(
        &self,
        address: u64,
        raw: u32,
        form: LoadStoreForm,
        addressing: AddressingForm,
        mem: Operand,
    ) -> Option<Instruction> {
        let name = Self::load_store_mnemonic(&form, addressing);
        if form.opcode == Opcode::Prefetch {
            if addressing == AddressingForm::Indexed || addressing == AddressingForm::Unprivileged {
                return None;
            }
            let rt = form.reg.index as u32;
            return build(address, raw, Opcode::Prefetch, name, vec![Operand::symbolic(prefetch_op(rt)), mem]);
        }
        build(address, raw, form.opcode, name, vec![reg(form.reg), mem])
    }

    fn decode_load_store_unsigned_imm(&self, address: u64, raw: u32) -> Option<Instruction> {
        let form = self.load_store_form(field(raw, 30, 2), bit(raw, 26), field(raw, 22, 2), field(raw, 0, 5))?;
        let scale = form.bytes.trailing_zeros();
        let offset = (field(raw, 10, 12) as i64) << scale;
        let rn = Register::gp_or_sp(field(raw, 5, 5), true);
        let mem = Operand::memory(rn, offset, IndexMode::Offset, form.bytes);
        self.finish_load_store(address, raw, form, AddressingForm::Scaled, mem)
    }

    fn decode_load_store_imm9(&self, address: u64, raw: u32) -> Option<Instruction> {
        let vector = bit(raw, 26);
        let form = self.load_store_form(field(raw, 30, 2), vector, field(raw, 22, 2), field(raw, 0, 5))?;
        let offset = sign_extend(field(raw, 12, 9) as u64, 9);
        let rn = Register::gp_or_sp(field(raw, 5, 5), true);
        let (addressing, mode) = match field(raw, 10, 2) {
            0 => (AddressingForm::Unscaled, IndexMode::Offset),
            1 => (AddressingForm::Indexed, IndexMode::PostIndex),
            2 if !vector => (AddressingForm::Unprivileged, IndexMode::Offset),
            3 => (AddressingForm::Indexed, IndexMode::PreIndex),
            _ => return None,
        };
        let mem = Operand::memory(rn, offset, mode, form.bytes);
        self.finish_load_store(address, raw, form, addressing, mem)
    }

    fn decode_load_store_reg_extended(&self, address: u64, raw: u32) -> Option<Instruction> {
        let size = field(raw, 30, 2);
        let vector = bit(raw, 26);
        let rn = Register::gp_or_sp(field(raw, 5, 5), true);
        let rt = field(raw, 0, 5);

        match field(raw, 10, 2) {
            2 => {
                let form = self.load_store_form(size, vector, field(raw, 22, 2), rt)?;
                let option = field(raw, 13, 3);
                if option & 2 == 0 {
                    return None;
                }
                let extend = if option == 3 { ExtendType::LSL } else { ExtendType::from_option(option) };
                let amount = if bit(raw, 12) { form.bytes.trailing_zeros() as u8 } else { 0 };
                let index = Register::gp(field(raw, 16, 5), option & 1 == 1);
                let mem = Operand::memory_indexed(rn, index, Some((extend, amount)), form.bytes);
                self.finish_load_store(address, raw, form, AddressingForm::Scaled, mem)
            }
            0 if !vector => self.decode_atomic_memory(address, raw, size, rn, rt),
            1 | 3 if size == 3 && !vector => {
                let name = if bit(raw, 23) { "ldrab" } else { "ldraa" };
                let s = field(raw, 22, 1) as u64;
                let offset = sign_extend((s << 9) | field(raw, 12, 9) as u64, 10) << 3;
                let mode = if bit(raw, 11) { IndexMode::PreIndex } else { IndexMode::Offset };
                build(
                    address,
                    raw,
                    Opcode::Load,
                    name,
                    vec![reg(Register::x(rt as u8)), Operand::memory(rn, offset, mode, 8)],
                )
            }
            _ => None,
        }
    }

    fn decode_atomic_memory(&self, address: u64, raw: u32, size: u32, rn: Register, rt: u32) -> Option<Instruction> {
        let acquire = bit(raw, 23);
        let release = bit(raw, 22);
        let o3 = bit(raw, 15);
        let opc = field(raw, 12, 3);
        let rs = field(raw, 16, 5);
        let is64 = size == 3;
        let suffix = match size {
            0 => "b",
            1 => "h",
            _ => "",
        };
        let mem = Operand::memory(rn, 0, IndexMode::Offset, 1u8 << size);

        if o3 && opc == 4 && acquire && !release && rs == 31 {
            let name = format!("ldapr{}", suffix);
            return build(address, raw, Opcode::Load, name, vec![reg(Register::gp(rt, is64)), mem]);
        }
        let base = match (o3, opc) {
            (false, 0) => "ldadd",
            (false, 1) => "ldclr",
            (false, 2) => "ldeor",
            (false, 3) => "ldset",
            (false, 4) => "ldsmax",
            (false, 5) => "ldsmin",
            (false, 6) => "ldumax",
            (false, 7) => "ldumin",
            (true, 0) => "swp",
            _ => return None,
        };
        let name = format!(
            "{}{}{}{}",
            base,
            if acquire { "a" } else { "" },
            if release { "l" } else { "" },
            suffix
        );
        build(
            address,
            raw,
            Opcode::Atomic,
            name,
            vec![reg(Register::gp(rs, is64)), reg(Register::gp(rt, is64)), mem],
        )
    }

    fn decode_data_processing_reg(&self, address: u64, raw: u32) -> Option<Instruction> {
        let op2 = field(raw, 21, 4);
        if !bit(raw, 28) {
            return if op2 & 0b1000 == 0 {
                self.decode_logical_shifted_reg(address, raw)
            } else if op2 & 0b0001 == 0 {
                self.decode_add_sub_shifted_reg(address, raw)
            } else {
                self.decode_add_sub_extended_reg(address, raw)
            };
        }
        match op2 {
            0b0000 => self.decode_adc_sbc(address, raw),
            0b0010 => self.decode_conditional_compare(address, raw),
            0b0100 => self.decode_conditional_select(address, raw),
            0b0110 if bit(raw, 30) => self.decode_data_processing_1source(address, raw),
            0b0110 => self.decode_data_processing_2source(address, raw),
            0b1000..=0b1111 => self.decode_data_processing_3source(address, raw),
            _ => None,
        }
    }

    fn shift_operand(shift: u32, amount: u32) -> Option<Operand> {
        if shift == 0 && amount == 0 {
            None
        } else {
            Some(Operand::shift(ShiftType::from_bits(shift), amount as u8))
        }
    }

    fn decode_logical_shifted_reg(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let opc = field(raw, 29, 2);
        let shift = field(raw, 22, 2);
        let negate = bit(raw, 21);
        let amount = field(raw, 10, 6);
        if !sf && amount >= 32 {
            return None;
        }
        let rn_bits = field(raw, 5, 5);
        let rd_bits = field(raw, 0, 5);
        let rd = reg(Register::gp(rd_bits, sf));
        let rn = reg(Register::gp(rn_bits, sf));
        let rm = reg(Register::gp(field(raw, 16, 5), sf));
        let shift_op = Self::shift_operand(shift, amount);

        let with_shift = |mut operands: Vec<Operand>| {
            operands.extend(shift_op.clone());
            operands
        };

        match (opc, negate) {
            (1, false) if rn_bits == 31 && shift_op.is_none() => build(address, raw, Opcode::MOV, "mov", vec![rd, rm]),
            (1, true) if rn_bits == 31 => build(address, raw, Opcode::MVN, "mvn", with_shift(vec![rd, rm])),
            (3, false) if rd_bits == 31 => build(address, raw, Opcode::TST, "tst", with_shift(vec![rn, rm])),
            _ => {
                let (opcode, name) = match (opc, negate) {
                    (0, false) => (Opcode::AND, "and"),
                    (0, true) => (Opcode::BIC, "bic"),
                    (1, false) => (Opcode::ORR, "orr"),
                    (1, true) => (Opcode::ORN, "orn"),
                    (2, false) => (Opcode::EOR, "eor"),
                    (2, true) => (Opcode::EON, "eon"),
                    (_, false) => (Opcode::ANDS, "ands"),
                    (_, true) => (Opcode::BIC, "bics"),
                };
                build(address, raw, opcode, name, with_shift(vec![rd, rn, rm]))
            }
        }
    }

    fn decode_add_sub_shifted_reg(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let op = bit(raw, 30);
        let s = bit(raw, 29);
        let shift = field(raw, 22, 2);
        let amount = field(raw, 10, 6);
        if shift == 3 || (!sf && amount >= 32) {
            return None;
        }
        let rn_bits = field(raw, 5, 5);
        let rd_bits = field(raw, 0, 5);
        let rd = reg(Register::gp(rd_bits, sf));
        let rn = reg(Register::gp(rn_bits, sf));
        let rm = reg(Register::gp(field(raw, 16, 5), sf));
        let shift_op = Self::shift_operand(shift, amount);
        let with_shift = |mut operands: Vec<Operand>| {
            operands.extend(shift_op.clone());
            operands
        };

        if s && rd_bits == 31 {
            let (opcode, name) = if op { (Opcode::CMP, "cmp") } else { (Opcode::CMN, "cmn") };
            return build(address, raw, opcode, name, with_shift(vec![rn, rm]));
        }
        if op && rn_bits == 31 {
            let name = if s { "negs" } else { "neg" };
            return build(address, raw, Opcode::NEG, name, with_shift(vec![rd, rm]));
        }
        let (opcode, name) = match (op, s) {
            (false, false) => (Opcode::ADD, "add"),
            (false, true) => (Opcode::ADDS, "adds"),
            (true, false) => (Opcode::SUB, "sub"),
            (true, true) => (Opcode::SUBS, "subs"),
        };
        build(address, raw, opcode, name, with_shift(vec![rd, rn, rm]))
    }

    fn decode_add_sub_extended_reg(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let op = bit(raw, 30);
        let s = bit(raw, 29);
        let option = field(raw, 13, 3);
        let amount = field(raw, 10, 3);
        if field(raw, 22, 2) != 0 || amount > 4 {
            return None;
        }
        let rn_bits = field(raw, 5, 5);
        let rd_bits = field(raw, 0, 5);
        let rn = Register::gp_or_sp(rn_bits, sf);
        let rd = if s { Register::gp(rd_bits, sf) } else { Register::gp_or_sp(rd_bits, sf) };
        let rm = Register::gp(field(raw, 16, 5), sf && option & 3 == 3);

        let default_extend = if sf { 3 } else { 2 };
        let touches_sp = rn_bits == 31 || (!s && rd_bits == 31);
        let extend = if touches_sp && option == default_extend {
            (amount != 0).then(|| Operand::shift(ShiftType::LSL, amount as u8))
        } else {
            Some(Operand::extend(ExtendType::from_option(option), amount as u8))
        };

        if s && rd_bits == 31 {
            let (opcode, name) = if op { (Opcode::CMP, "cmp") } else { (Opcode::CMN, "cmn") };
            let mut operands = vec![reg(rn), reg(rm)];
            operands.extend(extend);
            return build(address, raw, opcode, name, operands);
        }
        let (opcode, name) = match (op, s) {
            (false, false) => (Opcode::ADD, "add"),
            (false, true) => (Opcode::ADDS, "adds"),
            (true, false) => (Opcode::SUB, "sub"),
            (true, true) => (Opcode::SUBS, "subs"),
        };
        let mut operands = vec![reg(rd), reg(rn), reg(rm)];
        operands.extend(extend);
        build(address, raw, opcode, name, operands)
    }

    fn decode_adc_sbc(&self, address: u64, raw: u32) -> Option<Instruction> {
        if field(raw, 10, 6) != 0 {
            return None;
        }
        let sf = bit(raw, 31);
        let op = bit(raw, 30);
        let s = bit(raw, 29);
        let rn_bits = field(raw, 5, 5);
        let rd = reg(Register::gp(raw, sf));
        let rn = reg(Register::gp(rn_bits, sf));
        let rm = reg(Register::gp(field(raw, 16, 5), sf));
        match (op, s) {
            (false, false) => build(address, raw, Opcode::ADC, "adc", vec![rd, rn, rm]),
            (false, true) => build(address, raw, Opcode::ADC, "adcs", vec![rd, rn, rm]),
            (true, _) if rn_bits == 31 => build(address, raw, Opcode::SBC, if s { "ngcs" } else { "ngc" }, vec![rd, rm]),
            (true, _) => build(address, raw, Opcode::SBC, if s { "sbcs" } else { "sbc" }, vec![rd, rn, rm]),
        }
    }

    fn decode_conditional_compare(&self, address: u64, raw: u32) -> Option<Instruction> {
        if !bit(raw, 29) || bit(raw, 10) || bit(raw, 4) {
            return None;
        }
        let sf = bit(raw, 31);
        let cond = Condition::from_code(field(raw, 12, 4));
        let rn = reg(Register::gp(field(raw, 5, 5), sf));
        let rm_bits = field(raw, 16, 5);
        let second = if bit(raw, 11) { imm(rm_bits as i64) } else { reg(Register::gp(rm_bits, sf)) };
        let nzcv = imm(field(raw, 0, 4) as i64);
        let (opcode, name) = if bit(raw, 30) { (Opcode::CCMP, "ccmp") } else { (Opcode::CCMN, "ccmn") };
        build(address, raw, opcode, name, vec![rn, second, nzcv, Operand::condition(cond)])
            .map(|insn| insn.with_condition(cond))
    }

    fn decode_conditional_select(&self, address: u64, raw: u32) -> Option<Instruction> {
        let op2 = field(raw, 10, 2);
        if bit(raw, 29) || op2 > 1 {
            return None;
        }
        let sf = bit(raw, 31);
        let op = bit(raw, 30);
        let cond = Condition::from_code(field(raw, 12, 4));
        let rm_bits = field(raw, 16, 5);
        let rn_bits = field(raw, 5, 5);
        let rd = reg(Register::gp(raw, sf));
        let rn = reg(Register::gp(rn_bits, sf));
        let rm = reg(Register::gp(rm_bits, sf));
        let inv = cond.invert();
        let aliasable = rm_bits == rn_bits && !cond.is_always();

        let (opcode, name, operands, shown) = match (op, op2) {
            (false, 0) => (Opcode::CSEL, "csel", vec![rd, rn, rm, Operand::condition(cond)], cond),
            (false, _) if aliasable && rn_bits == 31 => (Opcode::CSET, "cset", vec![rd, Operand::condition(inv)], inv),
            (false, _) if aliasable => (Opcode::CINC, "cinc", vec![rd, rn, Operand::condition(inv)], inv),
            (false, _) => (Opcode::CSINC, "csinc", vec![rd, rn, rm, Operand::condition(cond)], cond),
            (true, 0) if aliasable && rn_bits == 31 => (Opcode::CSETM, "csetm", vec![rd, Operand::condition(inv)], inv),
            (true, 0) if aliasable => (Opcode::CINV, "cinv", vec![rd, rn, Operand::condition(inv)], inv),
            (true, 0) => (Opcode::CSINV, "csinv", vec![rd, rn, rm, Operand::condition(cond)], cond),
            (true, _) if aliasable => (Opcode::CNEG, "cneg", vec![rd, rn, Operand::condition(inv)], inv),
            (true, _) => (Opcode::CSNEG, "csneg", vec![rd, rn, rm, Operand::condition(cond)], cond),
        };
        build(address, raw, opcode, name, operands).map(|insn| insn.with_condition(shown))
    }

    fn decode_data_processing_2source(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let s = bit(raw, 29);
        let opcode = field(raw, 10, 6);
        if s && opcode != 0 {
            return None;
        }
        let rd_bits = field(raw, 0, 5);
        let rn_bits = field(raw, 5, 5);
        let rm_bits = field(raw, 16, 5);
        let three = |op: Opcode, name: &'static str| {
            build(
                address,
                raw,
                op,
                name,
                vec![
                    reg(Register::gp(rd_bits, sf)),
                    reg(Register::gp(rn_bits, sf)),
                    reg(Register::gp(rm_bits, sf)),
                ],
            )
        };

        match opcode {
            2 => three(Opcode::UDIV, "udiv"),
            3 => three(Opcode::SDIV, "sdiv"),
            8 => three(Opcode::LSL, "lsl"),
            9 => three(Opcode::LSR, "lsr"),
            10 => three(Opcode::ASR, "asr"),
            11 => three(Opcode::ROR, "ror"),
            0 if sf => build(
                address,
                raw,
                Opcode::SUB,
                if s { "subps" } else { "subp" },
                vec![
                    reg(Register::x(rd_bits as u8)),
                    reg(Register::gp_or_sp(rn_bits, true)),
                    reg(Register::gp_or_sp(rm_bits, true)),
                ],
            ),
            12 if sf => build(
                address,
                raw,
                Opcode::Pac,
                "pacga",
                vec![
                    reg(Register::x(rd_bits as u8)),
                    reg(Register::x(rn_bits as u8)),
                    reg(Register::gp_or_sp(rm_bits, true)),
                ],
            ),
            16..=23 => {
                let sz = opcode & 3;
                if (sz == 3) != sf {
                    return None;
                }
                let name = match (opcode & 4 != 0, sz) {
                    (false, 0) => "crc32b",
                    (false, 1) => "crc32h",
                    (false, 2) => "crc32w",
                    (false, _) => "crc32x",
                    (true, 0) => "crc32cb",
                    (true, 1) => "crc32ch",
                    (true, 2) => "crc32cw",
                    (true, _) => "crc32cx",
                };
                build(
                    address,
                    raw,
                    Opcode::Crc,
                    name,
                    vec![
                        reg(Register::w(rd_bits as u8)),
                        reg(Register::w(rn_bits as u8)),
                        reg(Register::gp(rm_bits, sz == 3)),
                    ],
                )
            }
            _ => None,
        }
    }

    fn decode_data_processing_1source(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        if bit(raw, 29) {
            return None;
        }
        let opcode2 = field(raw, 16, 5);
        let opcode = field(raw, 10, 6);
        let rn_bits = field(raw, 5, 5);
        let rd_bits = field(raw, 0, 5);

        if opcode2 == 0 {
            let name = match (opcode, sf) {
                (0, _) => "rbit",
                (1, _) => "rev16",
                (2, true) => "rev32",
                (2, false) => "rev",
                (3, true) => "rev",
                (4, _) => "clz",
                (5, _) => "cls",
                _ => return None,
            };
            return build(
                address,
                raw,
                Opcode::BitManip,
                name,
                vec![reg(Register::gp(rd_bits, sf)), reg(Register::gp(rn_bits, sf))],
            );
        }
        if opcode2 != 1 || !sf {
            return None;
        }
        const KEYED: [&str; 8] = ["pacia", "pacib", "pacda", "pacdb", "autia", "autib", "autda", "autdb"];
        const ZERO: [&str; 8] = ["paciza", "pacizb", "pacdza", "pacdzb", "autiza", "autizb", "autdza", "autdzb"];
        let xd = reg(Register::x(rd_bits as u8));
        match opcode {
            0..=7 => build(
                address,
                raw,
                Opcode::Pac,
                KEYED[opcode as usize],
                vec![xd, reg(Register::gp_or_sp(rn_bits, true))],
            ),
            8..=15 if rn_bits == 31 => build(address, raw, Opcode::Pac, ZERO[(opcode - 8) as usize], vec![xd]),
            16 if rn_bits == 31 => build(address, raw, Opcode::Pac, "xpaci", vec![xd]),
            17 if rn_bits == 31 => build(address, raw, Opcode::Pac, "xpacd", vec![xd]),
            _ => None,
        }
    }

    fn decode_data_processing_3source(&self, address: u64, raw: u32) -> Option<Instruction> {
        if field(raw, 29, 2) != 0 {
            return None;
        }
        let sf = bit(raw, 31);
        let op31 = field(raw, 21, 3);
        let o0 = bit(raw, 15);
        let ra_bits = field(raw, 10, 5);
        let rd_bits = field(raw, 0, 5);
        let rn_bits = field(raw, 5, 5);
        let rm_bits = field(raw, 16, 5);
        let no_addend = ra_bits == 31;

        let same = |op: Opcode, short: &'static str, long: &'static str| {
            let mut operands = vec![
                reg(Register::gp(rd_bits, sf)),
                reg(Register::gp(rn_bits, sf)),
                reg(Register::gp(rm_bits, sf)),
            ];
            if no_addend {
                return build(address, raw, op, short, operands);
            }
            operands.push(reg(Register::gp(ra_bits, sf)));
            build(address, raw, op, long, operands)
        };
        let widening = |short: &'static str, long: &'static str| {
            let mut operands = vec![
                reg(Register::x(rd_bits as u8)),
                reg(Register::w(rn_bits as u8)),
                reg(Register::w(rm_bits as u8)),
            ];
            if no_addend {
                return build(address, raw, Opcode::MulLong, short, operands);
            }
            operands.push(reg(Register::x(ra_bits as u8)));
            build(address, raw, Opcode::MulLong, long, operands)
        };
        let high = |name: &'static str| {
            build(
                address,
                raw,
                Opcode::MulHigh,
                name,
                vec![
                    reg(Register::x(rd_bits as u8)),
                    reg(Register::x(rn_bits as u8)),
                    reg(Register::x(rm_bits as u8)),
                ],
            )
        };

        match (op31, o0) {
            (0, false) if no_addend => same(Opcode::MUL, "mul", "madd"),
            (0, false) => same(Opcode::MADD, "mul", "madd"),
            (0, true) => same(Opcode::MSUB, "mneg", "msub"),
            (1, false) if sf => widening("smull", "smaddl"),
            (1, true) if sf => widening("smnegl", "smsubl"),
            (2, false) if sf && no_addend => high("smulh"),
            (5, false) if sf => widening("umull", "umaddl"),
            (5, true) if sf => widening("umnegl", "umsubl"),
            (6, false) if sf && no_addend => high("umulh"),
            _ => None,
        }
    }

    fn decode_simd_fp(&self, address: u64, raw: u32) -> Option<Instruction> {
        let rd = field(raw, 0, 5);
        let rn = field(raw, 5, 5);
        let rm = field(raw, 16, 5);

        if raw & 0x7f20_fc00 == 0x1e20_0000 {
            return self.decode_fp_integer_conversion(address, raw);
        }
        if raw & 0xff20_1fe0 == 0x1e20_1000 {
            let size = fp_size(field(raw, 22, 2))?;
            let value = vfp_expand_imm(field(raw, 13, 8));
            let operand = Operand { op_type: OperandType::FloatImmediate(value), size: size.bytes() };
            return build(address, raw, Opcode::FMOV, "fmov", vec![reg(Register::fp_reg(rd, size)), operand]);
        }
        if raw & 0xff20_fc07 == 0x1e20_2000 {
            let size = fp_size(field(raw, 22, 2))?;
            let name = if bit(raw, 4) { "fcmpe" } else { "fcmp" };
            let second = if bit(raw, 3) { Operand::symbolic("#0.0") } else { reg(Register::fp_reg(rm, size)) };
            return build(address, raw, Opcode::FCMP, name, vec![reg(Register::fp_reg(rn, size)), second]);
        }
        if raw & 0xff20_7c00 == 0x1e20_4000 {
            let size = fp_size(field(raw, 22, 2))?;
            let opcode = field(raw, 15, 6);
            let (op, name, dest) = match opcode {
                0 => (Opcode::FMOV, "fmov", size),
                1 => (Opcode::FloatArith, "fabs", size),
                2 => (Opcode::FloatArith, "fneg", size),
                3 => (Opcode::FloatArith, "fsqrt", size),
                4 | 5 | 7 => (Opcode::FloatConvert, "fcvt", fp_size(opcode & 3)?),
                8 => (Opcode::FloatConvert, "frintn", size),
                9 => (Opcode::FloatConvert, "frintp", size),
                10 => (Opcode::FloatConvert, "frintm", size),
                11 => (Opcode::FloatConvert, "frintz", size),
                12 => (Opcode::FloatConvert, "frinta", size),
                14 => (Opcode::FloatConvert, "frintx", size),
                15 => (Opcode::FloatConvert, "frinti", size),
                _ => return None,
            };
            if name == "fcvt" && dest == size {
                return None;
            }
            return build(
                address,
                raw,
                op,
                name,
                vec![reg(Register::fp_reg(rd, dest)), reg(Register::fp_reg(rn, size))],
            );
        }
        if raw & 0xff20_0c00 == 0x1e20_0800 {
            let size = fp_size(field(raw, 22, 2))?;
            let name = match field(raw, 12, 4) {
                0 => "fmul",
                1 => "fdiv",
                2 => "fadd",
                3 => "fsub",
                4 => "fmax",
                5 => "fmin",
                6 => "fmaxnm",
                7 => "fminnm",
                8 => "fnmul",
                _ => return None,
            };
            return build(
                address,
                raw,
                Opcode::FloatArith,
                name,
                vec![
                    reg(Register::fp_reg(rd, size)),
                    reg(Register::fp_reg(rn, size)),
                    reg(Register::fp_reg(rm, size)),
                ],
            );
        }
        if raw & 0xff20_0c00 == 0x1e20_0c00 {
            let size = fp_size(field(raw, 22, 2))?;
            let cond = Condition::from_code(field(raw, 12, 4));
            return build(
                address,
                raw,
                Opcode::CSEL,
                "fcsel",
                vec![
                    reg(Register::fp_reg(rd, size)),
                    reg(Register::fp_reg(rn, size)),
                    reg(Register::fp_reg(rm, size)),
                    Operand::condition(cond),
                ],
            )
            .map(|insn| insn.with_condition(cond));
        }
        None
    }

    fn decode_fp_integer_conversion(&self, address: u64, raw: u32) -> Option<Instruction> {
        let sf = bit(raw, 31);
        let size = fp_size(field(raw, 22, 2))?;
        let rd = field(raw, 0, 5);
        let rn = field(raw, 5, 5);
        let to_fp = |op: Opcode, name: &'static str| {
            build(address, raw, op, name, vec![reg(Register::fp_reg(rd, size)), reg(Register::gp(rn, sf))])
        };
        let to_gp = |op: Opcode, name: &'static str| {
            build(address, raw, op, name, vec![reg(Register::gp(rd, sf)), reg(Register::fp_reg(rn, size))])
        };

        match (field(raw, 19, 2), field(raw, 16, 3)) {
            (0, 6) => to_gp(Opcode::FMOV, "fmov"),
            (0, 7) => to_fp(Opcode::FMOV, "fmov"),
            (0, 2) => to_fp(Opcode::FloatConvert, "scvtf"),
            (0, 3) => to_fp(Opcode::FloatConvert, "ucvtf"),
            (3, 0) => to_gp(Opcode::FloatConvert, "fcvtzs"),
            (3, 1) => to_gp(Opcode::FloatConvert, "fcvtzu"),
            (0, 0) => to_gp(Opcode::FloatConvert, "fcvtns"),
            (0, 1) => to_gp(Opcode::FloatConvert, "fcvtnu"),
            (1, 0) => to_gp(Opcode::FloatConvert, "fcvtps"),
            (1, 1) => to_gp(Opcode::FloatConvert, "fcvtpu"),
            (2, 0) => to_gp(Opcode::FloatConvert, "fcvtms"),
            (2, 1) => to_gp(Opcode::FloatConvert, "fcvtmu"),
            (0, 4) => to_gp(Opcode::FloatConvert, "fcvtas"),
            (0, 5) => to_gp(Opcode::FloatConvert, "fcvtau"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::{decode, decode_word, InstructionCategory};

    fn text(raw: u32, address: u64) -> String {
        decode_word(raw, address).text()
    }

    #[test]
    fn test_prologue_and_epilogue_rendering() {
        assert_eq!(text(0xd503237f, 0), "pacibsp");
        assert_eq!(text(0xa9bf7bfd, 0), "stp x29, x30, [sp, #-0x10]!");
        assert_eq!(text(0x910003fd, 0), "mov x29, sp");
        assert_eq!(text(0xd10083ff, 0), "sub sp, sp, #0x20");
        assert_eq!(text(0xa9017bfd, 0), "stp x29, x30, [sp, #0x10]");
        assert_eq!(text(0x910043fd, 0), "add x29, sp, #0x10");
        assert_eq!(text(0xf90007e0, 0), "str x0, [sp, #0x8]");
        assert_eq!(text(0xa8c17bfd, 0), "ldp x29, x30, [sp], #0x10");
        assert_eq!(text(0xd65f03c0, 0), "ret");
    }

    #[test]
    fn test_branch_targets() {
        let bl = decode_word(0x94000010, 0x1_0000_0000);
        assert_eq!(bl.text(), "bl 0x100000040");
        assert!(bl.is_call());
        assert_eq!(bl.branch_target(), Some(0x1_0000_0040));

        let beq = decode_word(0x54000040, 0x1000);
        assert_eq!(beq.text(), "b.eq 0x1008");
        assert_eq!(beq.condition, Some(Condition::EQ));
        assert!(beq.is_conditional_branch());

        let back = decode_word(0x17ffffff, 0x2000);
        assert_eq!(back.text(), "b 0x1ffc");

        assert_eq!(text(0xb4000040, 0x2000), "cbz x0, 0x2008");
        assert_eq!(text(0x36080041, 0x3000), "tbz w1, #1, 0x3008");
        assert_eq!(text(0xd63f0100, 0), "blr x8");
        assert_eq!(text(0xd61f0200, 0), "br x16");
        assert!(decode_word(0xd65f0fff, 0).is_return());
        assert_eq!(text(0xd65f0fff, 0), "retab");
    }

    #[test]
    fn test_aliases() {
        assert_eq!(text(0xf100041f, 0), "cmp x0, #0x1");
        assert_eq!(text(0x52800020, 0), "mov w0, #0x1");
        assert_eq!(text(0x12800000, 0), "mov w0, #-0x1");
        assert_eq!(text(0xaa0103e0, 0), "mov x0, x1");
        assert_eq!(text(0x1a9f17e0, 0), "cset w0, eq");
        assert_eq!(text(0xd3607c20, 0), "lsl x0, x1, #32");
        assert_eq!(text(0x9b027c20, 0), "mul x0, x1, x2");
        assert_eq!(text(0x92400c00, 0), "and x0, x0, #0xf");
        assert_eq!(text(0x12001c00, 0), "and w0, w0, #0xff");
        assert_eq!(text(0xf2a00020, 0), "movk x0, #0x1, lsl #16");

        let cmp = decode_word(0xf100041f, 0);
        assert_eq!(cmp.category, InstructionCategory::Compare);
        assert_eq!(cmp.destination_register(), None);
    }

    #[test]
    fn test_memory_forms() {
        assert_eq!(text(0xb8617800, 0), "ldr w0, [x0, x1, lsl #2]");
        assert_eq!(text(0xf85f83a8, 0), "ldur x8, [x29, #-0x8]");
        assert_eq!(text(0x39400020, 0), "ldrb w0, [x1]");
        assert_eq!(text(0x885f7c01, 0), "ldxr w1, [x0]");
        assert_eq!(text(0xc8dffc00, 0), "ldar x0, [x0]");
        let literal = decode_word(0x58000040, 0x4000);
        assert_eq!(literal.text(), "ldr x0, 0x4008");
        assert_eq!(literal.pc_relative_target(), Some(0x4008));
    }

    #[test]
    fn test_pc_relative_and_system() {
        assert_eq!(text(0x90000008, 0x1_0000_3f00), "adrp x8, 0x100003000");
        assert_eq!(text(0xb0000008, 0x1_0000_3f00), "adrp x8, 0x100004000");
        assert_eq!(text(0x10000040, 0x1000), "adr x0, 0x1008");
        assert_eq!(text(0xd53bd040, 0), "mrs x0, tpidr_el0");
        assert_eq!(text(0xd5033bbf, 0), "dmb ish");
        assert_eq!(text(0xd503201f, 0), "nop");
        assert_eq!(text(0xd4200000, 0), "brk #0x0");
        assert_eq!(text(0xd4001001, 0), "svc #0x80");
        assert_eq!(text(0x00000000, 0), "udf #0");
    }

    #[test]
    fn test_floating_point_subset() {
        assert_eq!(text(0x1e601000, 0), "fmov d0, #2.00000000");
        assert_eq!(text(0x1e6e1000, 0), "fmov d0, #1.00000000");
        assert_eq!(text(0x9e670020, 0), "fmov d0, x1");
        assert_eq!(text(0x1e602020, 0), "fcmp d1, d0");
        assert_eq!(text(0x1e612800, 0), "fadd d0, d0, d1");
    }

    #[test]
    fn test_unknown_fallback_renders_raw_word() {
        let insn = decode_word(0xffffffff, 0x10);
        assert!(insn.is_unknown());
        assert_eq!(insn.mnemonic, "0xffffffff");
        assert_eq!(insn.address, 0x10);

        let short = decode(&[0x1f, 0x20], 0);
        assert!(short.is_unknown());
    }

    #[test]
    fn test_bit_masks_reject_reserved_patterns() {
        assert_eq!(decode_bit_masks(0, 0x3f, 0, 32), None);
        assert_eq!(decode_bit_masks(1, 0x3f, 0, 64), None);
        assert_eq!(decode_bit_masks(0, 0x3c, 0, 64), Some(0x5555_5555_5555_5555));
        assert_eq!(decode_bit_masks(1, 0, 1, 64), Some(0x8000_0000_0000_0000));
    }

    #[test]
    fn test_sampled_words_decode_without_panicking() {
        let decoder = Arm64Decoder::new();
        let mut word: u32 = 0x1234_5678;
        for i in 0..(1u32 << 20) {
            word ^= word << 13;
            word ^= word >> 17;
            word ^= word << 5;
            for raw in [word, i << 12, (i << 20) | (word & 0xfffff)] {
                let insn = decoder.decode(0xffff_ffff_ffff_f000, raw);
                assert!(!insn.mnemonic.is_empty(), "empty mnemonic for {:08x}", raw);
                assert_eq!(insn.raw, raw);
            }
        }
    }

    #[test]
    #[ignore]
    fn test_exhaustive_decode_is_total() {
        let decoder = Arm64Decoder::new();
        for raw in 0..=u32::MAX {
            let insn = decoder.decode(0x1_0000_0000, raw);
            assert!(!insn.mnemonic.is_empty(), "empty mnemonic for {:08x}", raw);
        }
    }
}
