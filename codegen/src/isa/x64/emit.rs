//! Per-operation x64 encoding.
//!
//! Each `encode_*` method answers in probe mode (`EmitFlags::CAN_ENCODE`)
//! whether its operands are encodable as-is, returning a legalization hint
//! otherwise, and in emit mode appends the exact byte sequence. Emit mode
//! must only be entered for operand combinations whose probe answers
//! [`EncodeResult::Zero`]; anything else is a legalizer bug and panics.

use crate::binemit::{CpuSymbolKind, JumpFixup, Reloc};
use crate::ir::condcodes::Cond;
use crate::ir::data::DataSegment;
use crate::ir::instructions::{Inst, Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::ir::reg::Reg;
use crate::isa::x64::encoding::*;
use crate::isa::x64::regs;
use crate::isa::x64::{EmitFlags, EncodeResult, X64Encoder};
use crate::settings::OptLevel;

/// Opcode byte of the `op r/m, r` form of the classic ALU group.
fn alu_rm_opcode(op: AluOp) -> Option<u8> {
    Some(match op {
        AluOp::Add => 0x01,
        AluOp::Or => 0x09,
        AluOp::And => 0x21,
        AluOp::Sub => 0x29,
        AluOp::Xor => 0x31,
        _ => return None,
    })
}

/// Opcode byte of the `op r, r/m` form of the classic ALU group, plus
/// signed multiply.
fn alu_mr_opcode(op: AluOp) -> Option<u8> {
    Some(match op {
        AluOp::Add => 0x03,
        AluOp::Or => 0x0B,
        AluOp::And => 0x23,
        AluOp::Sub => 0x2B,
        AluOp::Xor => 0x33,
        _ => return None,
    })
}

/// The `/digit` of the 0x80/0x83/0x81 immediate ALU group.
fn alu_imm_digit(op: AluOp) -> Option<u8> {
    Some(match op {
        AluOp::Add => 0,
        AluOp::Or => 1,
        AluOp::And => 4,
        AluOp::Sub => 5,
        AluOp::Xor => 6,
        _ => return None,
    })
}

/// The `/digit` of the shift group (0xD1/0xC1/0xD3).
fn shift_digit(op: AluOp) -> u8 {
    match op {
        AluOp::Rol => 0,
        AluOp::Ror => 1,
        AluOp::Shl | AluOp::Sal => 4,
        AluOp::Shr => 5,
        AluOp::Sar => 7,
        other => unreachable!("not a shift: {other:?}"),
    }
}

/// Second opcode byte of the scalar SSE operation group (after 0x0F).
fn float_op_opcode(op: AluOp) -> u8 {
    match op {
        AluOp::Fadd => 0x58,
        AluOp::Fmul => 0x59,
        AluOp::Fsub => 0x5C,
        AluOp::Fdiv => 0x5E,
        AluOp::Fsqrt => 0x51,
        AluOp::Fand => 0x54,
        AluOp::Fxor => 0x57,
        other => unreachable!("not a scalar float op: {other:?}"),
    }
}

/// setcc opcode byte (after 0x0F) for a condition.
fn setcc_opcode(cond: Cond) -> u8 {
    match cond {
        Cond::Equal | Cond::Zero => 0x94,
        Cond::NotEqual | Cond::NotZero => 0x95,
        Cond::Above => 0x97,
        Cond::AboveOrEqual => 0x93,
        Cond::Below => 0x92,
        Cond::BelowOrEqual | Cond::NotAbove => 0x96,
        Cond::Greater => 0x9F,
        Cond::GreaterOrEqual => 0x9D,
        Cond::Less => 0x9C,
        Cond::LessOrEqual => 0x9E,
        Cond::Unconditional => unreachable!("setcc of unconditional"),
    }
}

/// cmovcc opcode byte (after 0x0F) for a condition.
fn cmov_opcode(cond: Cond) -> u8 {
    match cond {
        Cond::Below => 0x42,
        Cond::AboveOrEqual => 0x43,
        Cond::Equal | Cond::Zero => 0x44,
        Cond::NotEqual | Cond::NotZero => 0x45,
        Cond::BelowOrEqual | Cond::NotAbove => 0x46,
        Cond::Above => 0x47,
        Cond::Less => 0x4C,
        Cond::GreaterOrEqual => 0x4D,
        Cond::LessOrEqual => 0x4E,
        Cond::Greater => 0x4F,
        Cond::Unconditional => unreachable!("cmov of unconditional"),
    }
}

/// jcc short-form opcode for a condition.
fn jcc8_opcode(cond: Cond) -> u8 {
    match cond {
        Cond::Unconditional => 0xEB,
        Cond::Equal | Cond::Zero => 0x74,
        Cond::NotEqual | Cond::NotZero => 0x75,
        Cond::Above => 0x77,
        Cond::AboveOrEqual => 0x73,
        Cond::Below => 0x72,
        Cond::BelowOrEqual | Cond::NotAbove => 0x76,
        Cond::Greater => 0x7F,
        Cond::GreaterOrEqual => 0x7D,
        Cond::Less => 0x7C,
        Cond::LessOrEqual => 0x7E,
    }
}

/// Probe checks shared by every scaled-indexed (AMC) form.
fn probe_amc_common(base: Reg, index: Reg, scale: u64, disp: u64, amc_bits: OpBits) -> EncodeResult {
    if !matches!(scale, 1 | 2 | 4 | 8) {
        return EncodeResult::NotSupported;
    }
    if amc_bits != OpBits::B32 && amc_bits != OpBits::B64 {
        return EncodeResult::NotSupported;
    }
    if disp > 0x7FFF_FFFF {
        return EncodeResult::NotSupported;
    }
    if base.is_float() || index.is_float() {
        return EncodeResult::NotSupported;
    }
    if amc_bits != OpBits::B64 && (base == regs::rsp() || index == regs::rsp()) {
        return EncodeResult::NotSupported;
    }
    if index == regs::rsp() && scale != 1 {
        return EncodeResult::NotSupported;
    }
    EncodeResult::Zero
}

/// Which operation an AMC access performs.
#[derive(Clone, Copy, PartialEq, Eq)]
enum AmcOp {
    Lea,
    Mov,
    Movsxd,
}

impl X64Encoder {
    fn emit_amc_addressing(&mut self, reg_field: u8, base: Reg, index: Reg, scale: u64, disp: u64) {
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        let scale_bits = scale.trailing_zeros() as u8;
        let no_base = base.is_no_base();

        let mode = if base == regs::r13() {
            if disp <= 0x7F {
                ModRmMode::Displacement8
            } else {
                ModRmMode::Displacement32
            }
        } else if disp == 0 || no_base {
            ModRmMode::Memory
        } else if disp <= 0x7F {
            ModRmMode::Displacement8
        } else {
            ModRmMode::Displacement32
        };
        self.buf.put1(encode_modrm(mode, reg_field, MODRM_RM_SIB));

        if no_base {
            self.buf
                .put1(encode_sib(scale_bits, regs::enc(index), SIB_NO_BASE));
            emit_value(&mut self.buf, disp, OpBits::B32);
        } else {
            self.buf
                .put1(encode_sib(scale_bits, regs::enc(index), regs::enc(base)));
            if base == regs::r13() || disp != 0 {
                let width = if disp <= 0x7F { OpBits::B8 } else { OpBits::B32 };
                emit_value(&mut self.buf, disp, width);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_amc_reg(
        &mut self,
        reg: Reg,
        reg_bits: OpBits,
        mut base: Reg,
        mut index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
        op: AmcOp,
        store: bool,
        flags: EmitFlags,
    ) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            let common = probe_amc_common(base, index, scale, disp, amc_bits);
            if common != EncodeResult::Zero {
                return common;
            }
            if op == AmcOp::Lea && reg_bits == OpBits::B8 {
                return EncodeResult::NotSupported;
            }
            if reg.is_float() && op != AmcOp::Mov {
                return EncodeResult::NotSupported;
            }
            if reg.is_float() && reg_bits != OpBits::B32 && reg_bits != OpBits::B64 {
                return EncodeResult::NotSupported;
            }
            return EncodeResult::Zero;
        }

        if index == regs::rsp() {
            debug_assert_eq!(scale, 1);
            core::mem::swap(&mut index, &mut base);
        }

        if amc_bits == OpBits::B32 {
            self.buf.put1(0x67);
        }
        if reg_bits == OpBits::B16 || reg.is_float() {
            self.buf.put1(0x66);
        }

        let w = reg_bits == OpBits::B64 && !reg.is_float();
        let byte_access = reg_bits == OpBits::B8 && !reg.is_float();
        emit_rex_sib(&mut self.buf, w, reg, index, base, byte_access);

        match op {
            AmcOp::Lea => emit_spec_b8(&mut self.buf, 0x8D, reg_bits),
            AmcOp::Movsxd => self.buf.put1(0x63),
            AmcOp::Mov => {
                if reg.is_float() {
                    self.buf.put1(0x0F);
                    self.buf.put1(if store { 0x7E } else { 0x6E });
                } else {
                    emit_spec_b8(&mut self.buf, if store { 0x89 } else { 0x8B }, reg_bits);
                }
            }
        }

        self.emit_amc_addressing(regs::enc(reg), base, index, scale, disp);
        EncodeResult::Zero
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_amc_imm(
        &mut self,
        mut base: Reg,
        mut index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
        value: u64,
        val_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            let common = probe_amc_common(base, index, scale, disp, amc_bits);
            if common != EncodeResult::Zero {
                return common;
            }
            if value > 0x7FFF_FFFF {
                return EncodeResult::NotSupported;
            }
            return EncodeResult::Zero;
        }

        if index == regs::rsp() {
            debug_assert_eq!(scale, 1);
            core::mem::swap(&mut index, &mut base);
        }

        if amc_bits == OpBits::B32 {
            self.buf.put1(0x67);
        }
        if val_bits == OpBits::B16 {
            self.buf.put1(0x66);
        }

        emit_rex_sib(&mut self.buf, val_bits == OpBits::B64, Reg::INVALID, index, base, false);
        emit_spec_b8(&mut self.buf, 0xC7, val_bits);
        self.emit_amc_addressing(0, base, index, scale, disp);
        emit_value(&mut self.buf, value, val_bits.min(OpBits::B32));
        EncodeResult::Zero
    }

    // ---- moves ---------------------------------------------------------

    pub fn encode_load_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        if dst.is_float() && src.is_float() {
            emit_spec_f64(&mut self.buf, 0xF3, bits);
            self.buf.put1(0x0F);
            self.buf.put1(0x10);
            emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
        } else if dst.is_float() {
            // movd/movq xmm, r.
            self.buf.put1(0x66);
            emit_rex(&mut self.buf, bits, dst, src);
            self.buf.put1(0x0F);
            self.buf.put1(0x6E);
            emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
        } else if src.is_float() {
            self.buf.put1(0x66);
            emit_rex(&mut self.buf, bits, src, dst);
            self.buf.put1(0x0F);
            self.buf.put1(0x7E);
            emit_modrm_reg(&mut self.buf, regs::enc(src), dst);
        } else {
            emit_rex(&mut self.buf, bits, src, dst);
            emit_spec_b8(&mut self.buf, 0x89, bits);
            emit_modrm_reg(&mut self.buf, regs::enc(src), dst);
        }
        EncodeResult::Zero
    }

    pub fn encode_load_reg_imm(
        &mut self,
        reg: Reg,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if reg.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Right2Cst;
            }
            panic!("float immediate load must be legalized through memory");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        if bits == OpBits::B8 {
            emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
            self.buf.put1(0xB0 | (regs::enc(reg) & 0b111));
            emit_value(&mut self.buf, value, OpBits::B8);
        } else {
            emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
            self.buf.put1(0xB8 | (regs::enc(reg) & 0b111));
            emit_value(&mut self.buf, value, bits);
        }
        EncodeResult::Zero
    }

    pub fn encode_load_reg_mem(
        &mut self,
        reg: Reg,
        base: Reg,
        offset: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("load reg<-mem: unencodable address");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        if reg.is_float() {
            emit_spec_f64(&mut self.buf, 0xF3, bits);
            emit_rex(&mut self.buf, OpBits::Zero, reg, base);
            self.buf.put1(0x0F);
            self.buf.put1(0x10);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(reg), base);
        } else {
            emit_rex(&mut self.buf, bits, reg, base);
            emit_spec_b8(&mut self.buf, 0x8B, bits);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(reg), base);
        }
        EncodeResult::Zero
    }

    pub fn encode_load_mem_reg(
        &mut self,
        base: Reg,
        offset: u64,
        src: Reg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("store mem<-reg: unencodable address");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        if src.is_float() {
            emit_spec_f64(&mut self.buf, 0xF3, bits);
            emit_rex(&mut self.buf, OpBits::Zero, src, base);
            self.buf.put1(0x0F);
            self.buf.put1(0x11);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(src), base);
        } else {
            emit_rex(&mut self.buf, bits, src, base);
            emit_spec_b8(&mut self.buf, 0x89, bits);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(src), base);
        }
        EncodeResult::Zero
    }

    pub fn encode_load_mem_imm(
        &mut self,
        base: Reg,
        offset: u64,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("store mem<-imm: unencodable address");
        }
        if bits == OpBits::B128 {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Right2Reg;
            }
            panic!("store mem<-imm: 128-bit immediate");
        }
        // A 64-bit store only carries a sign-extended 32-bit immediate.
        if bits == OpBits::B64 && value > 0x7FFF_FFFF && value >> 32 != 0xFFFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Right2Reg;
            }
            panic!("store mem<-imm: immediate needs a register");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        emit_rex(&mut self.buf, bits, Reg::INVALID, base);
        emit_spec_b8(&mut self.buf, 0xC7, bits);
        emit_modrm_mem(&mut self.buf, offset, 0, base);
        emit_value(&mut self.buf, value, bits.min(OpBits::B32));
        EncodeResult::Zero
    }

    // ---- extensions ----------------------------------------------------

    pub fn encode_load_zero_ext_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        debug_assert_ne!(dst_bits, src_bits);
        if dst.is_float() || src.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("zero-extend of float register");
        }
        match (src_bits, dst_bits) {
            (OpBits::B8, OpBits::B32 | OpBits::B64) => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(0xB6);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            }
            (OpBits::B16, OpBits::B32 | OpBits::B64) => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(0xB7);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            }
            (OpBits::B32, OpBits::B64) => {
                // A 32-bit move zero-extends for free.
                return self.encode_load_reg_reg(dst, src, OpBits::B32, flags);
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("zero-extend {src_bits} -> {dst_bits}");
            }
        }
        EncodeResult::Zero
    }

    pub fn encode_load_zero_ext_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        debug_assert_ne!(dst_bits, src_bits);
        if base.is_float() || offset > 0x7FFF_FFFF || dst.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("zero-extend load: unencodable operands");
        }
        match (src_bits, dst_bits) {
            (OpBits::B8, OpBits::B32 | OpBits::B64) => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, base);
                self.buf.put1(0x0F);
                self.buf.put1(0xB6);
                emit_modrm_mem(&mut self.buf, offset, regs::enc(dst), base);
            }
            (OpBits::B16, OpBits::B32 | OpBits::B64) => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, base);
                self.buf.put1(0x0F);
                self.buf.put1(0xB7);
                emit_modrm_mem(&mut self.buf, offset, regs::enc(dst), base);
            }
            (OpBits::B32, OpBits::B64) => {
                return self.encode_load_reg_mem(dst, base, offset, OpBits::B32, flags);
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("zero-extend load {src_bits} -> {dst_bits}");
            }
        }
        EncodeResult::Zero
    }

    pub fn encode_load_signed_ext_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        debug_assert_ne!(dst_bits, src_bits);
        if dst.is_float() || src.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("sign-extend of float register");
        }
        match src_bits {
            OpBits::B8 => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(0xBE);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            }
            OpBits::B16 => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(0xBF);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            }
            OpBits::B32 if dst_bits == OpBits::B64 => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, dst_bits, dst, src);
                self.buf.put1(0x63);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("sign-extend {src_bits} -> {dst_bits}");
            }
        }
        EncodeResult::Zero
    }

    pub fn encode_load_signed_ext_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        dst_bits: OpBits,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        debug_assert_ne!(dst_bits, src_bits);
        if base.is_float() || offset > 0x7FFF_FFFF || dst.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("sign-extend load: unencodable operands");
        }
        let opcode: &[u8] = match src_bits {
            OpBits::B8 => &[0x0F, 0xBE],
            OpBits::B16 => &[0x0F, 0xBF],
            OpBits::B32 if dst_bits == OpBits::B64 => &[0x63],
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("sign-extend load {src_bits} -> {dst_bits}");
            }
        };
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        emit_rex(&mut self.buf, dst_bits, dst, base);
        for &byte in opcode {
            self.buf.put1(byte);
        }
        emit_modrm_mem(&mut self.buf, offset, regs::enc(dst), base);
        EncodeResult::Zero
    }

    // ---- address computation -------------------------------------------

    pub fn encode_load_addr_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            if bits != OpBits::B64 || base.is_float() || offset > 0x7FFF_FFFF {
                return EncodeResult::NotSupported;
            }
            return EncodeResult::Zero;
        }
        if offset == 0 {
            return self.encode_load_reg_reg(dst, base, OpBits::B64, flags);
        }
        emit_rex(&mut self.buf, OpBits::B64, dst, base);
        self.buf.put1(0x8D);
        emit_modrm_mem(&mut self.buf, offset, regs::enc(dst), base);
        EncodeResult::Zero
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_load_addr_amc_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        dst_bits: OpBits,
        amc_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        self.encode_amc_reg(dst, dst_bits, base, index, scale, disp, amc_bits, AmcOp::Lea, false, flags)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_load_amc_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        dst_bits: OpBits,
        amc_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        self.encode_amc_reg(dst, dst_bits, base, index, scale, disp, amc_bits, AmcOp::Mov, false, flags)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_load_amc_mem_reg(
        &mut self,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
        src: Reg,
        src_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        self.encode_amc_reg(src, src_bits, base, index, scale, disp, amc_bits, AmcOp::Mov, true, flags)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode_load_amc_mem_imm(
        &mut self,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
        value: u64,
        val_bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        self.encode_amc_imm(base, index, scale, disp, amc_bits, value, val_bits, flags)
    }

    // ---- flag producers and consumers ----------------------------------

    pub fn encode_clear_reg(&mut self, reg: Reg, bits: OpBits, flags: EmitFlags) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        if reg.is_float() {
            emit_prefix_f64(&mut self.buf, bits);
            self.buf.put1(0x0F);
            self.buf.put1(0x57);
            emit_modrm_reg(&mut self.buf, regs::enc(reg), reg);
        } else {
            emit_rex(&mut self.buf, bits, reg, reg);
            emit_spec_b8(&mut self.buf, 0x31, bits);
            emit_modrm_reg(&mut self.buf, regs::enc(reg), reg);
        }
        EncodeResult::Zero
    }

    pub fn encode_set_cond_reg(&mut self, reg: Reg, cond: Cond, flags: EmitFlags) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        emit_rex(&mut self.buf, OpBits::B8, Reg::INVALID, reg);
        self.buf.put1(0x0F);
        self.buf.put1(setcc_opcode(cond));
        emit_modrm_reg(&mut self.buf, 0, reg);
        EncodeResult::Zero
    }

    pub fn encode_load_cond_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        cond: Cond,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        let bits = bits.max(OpBits::B32);
        emit_rex(&mut self.buf, bits, dst, src);
        self.buf.put1(0x0F);
        self.buf.put1(cmov_opcode(cond));
        emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
        EncodeResult::Zero
    }

    pub fn encode_cmp_reg_reg(
        &mut self,
        lhs: Reg,
        rhs: Reg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if lhs.is_float() {
            if rhs.is_int() {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Right2Reg;
                }
                panic!("compare of float and int registers");
            }
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            // comiss/comisd.
            emit_prefix_f64(&mut self.buf, bits);
            self.buf.put1(0x0F);
            self.buf.put1(0x2F);
            emit_modrm_reg(&mut self.buf, regs::enc(lhs), rhs);
        } else {
            if flags.has(EmitFlags::CAN_ENCODE) {
                if rhs.is_float() {
                    return EncodeResult::NotSupported;
                }
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, rhs, lhs);
            emit_spec_b8(&mut self.buf, 0x39, bits);
            emit_modrm_reg(&mut self.buf, regs::enc(rhs), lhs);
        }
        EncodeResult::Zero
    }

    pub fn encode_cmp_reg_imm(
        &mut self,
        reg: Reg,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if reg.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("compare of float register with immediate");
        }
        if bits == OpBits::B8 {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
            self.buf.put1(0x80);
            emit_modrm_reg(&mut self.buf, 7, reg);
            emit_value(&mut self.buf, value, OpBits::B8);
        } else if can_encode8(value, bits) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
            self.buf.put1(0x83);
            emit_modrm_reg(&mut self.buf, 7, reg);
            emit_value(&mut self.buf, value, OpBits::B8);
        } else if bits != OpBits::B64 || value <= 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
            self.buf.put1(0x81);
            emit_modrm_reg(&mut self.buf, 7, reg);
            emit_value(&mut self.buf, value, bits.min(OpBits::B32));
        } else {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Right2Reg;
            }
            panic!("compare immediate needs a register");
        }
        EncodeResult::Zero
    }

    pub fn encode_cmp_reg_zero(&mut self, reg: Reg, bits: OpBits, flags: EmitFlags) -> EncodeResult {
        if reg.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("zero-compare of float register");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        // test reg, reg.
        emit_rex(&mut self.buf, bits, reg, reg);
        emit_spec_b8(&mut self.buf, 0x85, bits);
        emit_modrm_reg(&mut self.buf, regs::enc(reg), reg);
        EncodeResult::Zero
    }

    pub fn encode_cmp_mem_reg(
        &mut self,
        base: Reg,
        offset: u64,
        rhs: Reg,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("compare mem: unencodable address");
        }
        if rhs.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Left2Reg;
            }
            panic!("compare mem with float register");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        emit_rex(&mut self.buf, bits, rhs, base);
        emit_spec_b8(&mut self.buf, 0x39, bits);
        emit_modrm_mem(&mut self.buf, offset, regs::enc(rhs), base);
        EncodeResult::Zero
    }

    pub fn encode_cmp_mem_imm(
        &mut self,
        base: Reg,
        offset: u64,
        value: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("compare mem-imm: unencodable address");
        }
        if bits == OpBits::B8 {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, base);
            self.buf.put1(0x80);
            emit_modrm_mem(&mut self.buf, offset, 7, base);
            emit_value(&mut self.buf, value, OpBits::B8);
        } else if can_encode8(value, bits) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, base);
            self.buf.put1(0x83);
            emit_modrm_mem(&mut self.buf, offset, 7, base);
            emit_value(&mut self.buf, value, OpBits::B8);
        } else if value <= 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, base);
            self.buf.put1(0x81);
            emit_modrm_mem(&mut self.buf, offset, 7, base);
            let width = if bits == OpBits::B16 { bits } else { OpBits::B32 };
            emit_value(&mut self.buf, value, width);
        } else {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Right2Reg;
            }
            panic!("compare mem immediate needs a register");
        }
        EncodeResult::Zero
    }

    // ---- unary operations ----------------------------------------------

    pub fn encode_op_unary_reg(
        &mut self,
        reg: Reg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if reg.is_float() || !matches!(op, AluOp::Not | AluOp::Neg | AluOp::Bswap) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("unary {op:?} on {reg:?}");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        match op {
            AluOp::Not => {
                emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                emit_spec_b8(&mut self.buf, 0xF7, bits);
                emit_modrm_reg(&mut self.buf, 2, reg);
            }
            AluOp::Neg => {
                emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                emit_spec_b8(&mut self.buf, 0xF7, bits);
                emit_modrm_reg(&mut self.buf, 3, reg);
            }
            AluOp::Bswap => {
                if bits == OpBits::B16 {
                    // rol r16, 8
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    self.buf.put1(0xC1);
                    emit_modrm_reg(&mut self.buf, 0, reg);
                    emit_value(&mut self.buf, 8, OpBits::B8);
                } else {
                    debug_assert!(bits == OpBits::B32 || bits == OpBits::B64);
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    self.buf.put1(0x0F);
                    self.buf.put1(0xC8 | (regs::enc(reg) & 0b111));
                }
            }
            _ => unreachable!(),
        }
        EncodeResult::Zero
    }

    pub fn encode_op_unary_mem(
        &mut self,
        base: Reg,
        offset: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF || !matches!(op, AluOp::Not | AluOp::Neg) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("unary {op:?} on memory");
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        emit_rex(&mut self.buf, bits, Reg::INVALID, base);
        emit_spec_b8(&mut self.buf, 0xF7, bits);
        let digit = if op == AluOp::Not { 2 } else { 3 };
        emit_modrm_mem(&mut self.buf, offset, digit, base);
        EncodeResult::Zero
    }

    // ---- binary operations ---------------------------------------------

    pub fn encode_op_binary_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if op == AluOp::UintToFloat {
            // Unsigned conversion needs a multi-instruction expansion owned
            // by the builder.
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("unsigned int->float conversion is not a single instruction");
        }

        if dst.is_float() && src.is_int() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                if op != AluOp::IntToFloat {
                    return EncodeResult::NotSupported;
                }
                return EncodeResult::Zero;
            }
            emit_spec_f64(&mut self.buf, 0xF3, bits);
            // The integer lane is kept 64-bit clean by the builder, so the
            // wide form is always usable.
            emit_rex(&mut self.buf, OpBits::B64, dst, src);
            self.buf.put1(0x0F);
            self.buf.put1(0x2A);
            emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            return EncodeResult::Zero;
        }

        if dst.is_int() && src.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                if op != AluOp::FloatToInt {
                    return EncodeResult::NotSupported;
                }
                return EncodeResult::Zero;
            }
            emit_spec_f64(&mut self.buf, 0xF3, bits);
            emit_rex(&mut self.buf, OpBits::B64, dst, src);
            self.buf.put1(0x0F);
            self.buf.put1(0x2C);
            emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            return EncodeResult::Zero;
        }

        if dst.is_float() && src.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            if matches!(op, AluOp::Fsqrt | AluOp::Fand | AluOp::Fxor) {
                emit_prefix_f64(&mut self.buf, bits);
            } else {
                emit_spec_f64(&mut self.buf, 0xF3, bits);
            }
            self.buf.put1(0x0F);
            self.buf.put1(float_op_opcode(op));
            emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
            return EncodeResult::Zero;
        }

        match op {
            AluOp::Sdiv | AluOp::Udiv | AluOp::Srem | AluOp::Urem => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if dst != regs::rax() {
                        return EncodeResult::Left2Rax;
                    }
                    if src == regs::rax() || src == regs::rdx() {
                        return EncodeResult::NotSupported;
                    }
                    return EncodeResult::Zero;
                }
                debug_assert_eq!(dst, regs::rax());
                let rax = regs::rax();
                let signed = matches!(op, AluOp::Sdiv | AluOp::Srem);
                if signed && bits == OpBits::B8 {
                    self.encode_load_signed_ext_reg_reg(rax, rax, OpBits::B32, OpBits::B8, EmitFlags::NONE);
                } else if bits == OpBits::B8 {
                    self.encode_load_zero_ext_reg_reg(rax, rax, OpBits::B32, OpBits::B8, EmitFlags::NONE);
                } else if !signed {
                    self.encode_clear_reg(regs::rdx(), bits, EmitFlags::NONE);
                } else {
                    // cwd/cdq/cqo sign-extends rax into rdx.
                    emit_rex(&mut self.buf, bits, Reg::INVALID, Reg::INVALID);
                    self.buf.put1(0x99);
                }
                emit_rex(&mut self.buf, bits, Reg::INVALID, src);
                emit_spec_b8(&mut self.buf, 0xF7, bits);
                let digit = if signed { 7 } else { 6 };
                emit_modrm_reg(&mut self.buf, digit, src);
                if matches!(op, AluOp::Srem | AluOp::Urem) {
                    if bits == OpBits::B8 {
                        // The remainder lands in AH; shift it down.
                        self.encode_op_binary_reg_imm(rax, 8, AluOp::Shr, OpBits::B32, EmitFlags::NONE);
                    } else {
                        self.encode_load_reg_reg(rax, regs::rdx(), bits, EmitFlags::NONE);
                    }
                }
                EncodeResult::Zero
            }
            AluOp::Umul => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if dst != regs::rax() {
                        return EncodeResult::Left2Rax;
                    }
                    if src == regs::rax() || src == regs::rdx() {
                        return EncodeResult::NotSupported;
                    }
                    return EncodeResult::Zero;
                }
                debug_assert_eq!(dst, regs::rax());
                emit_rex(&mut self.buf, bits, Reg::INVALID, src);
                emit_spec_b8(&mut self.buf, 0xF7, bits);
                emit_modrm_reg(&mut self.buf, 4, src);
                EncodeResult::Zero
            }
            AluOp::Smul => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                if bits == OpBits::B8 {
                    self.encode_load_signed_ext_reg_reg(dst, dst, OpBits::B32, OpBits::B8, EmitFlags::NONE);
                    self.encode_load_signed_ext_reg_reg(src, src, OpBits::B32, OpBits::B8, EmitFlags::NONE);
                }
                emit_rex(&mut self.buf, bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(0xAF);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
                EncodeResult::Zero
            }
            op if op.is_shift() => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if src != regs::rcx() {
                        return EncodeResult::Right2Rcx;
                    }
                    return EncodeResult::Zero;
                }
                debug_assert_eq!(src, regs::rcx());
                emit_rex(&mut self.buf, bits, Reg::INVALID, dst);
                emit_spec_b8(&mut self.buf, 0xD3, bits);
                emit_modrm_reg(&mut self.buf, shift_digit(op), dst);
                EncodeResult::Zero
            }
            AluOp::Add | AluOp::Sub | AluOp::Xor | AluOp::And | AluOp::Or => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, bits, src, dst);
                emit_spec_b8(&mut self.buf, alu_rm_opcode(op).unwrap(), bits);
                emit_modrm_reg(&mut self.buf, regs::enc(src), dst);
                EncodeResult::Zero
            }
            AluOp::Xchg => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, bits, src, dst);
                emit_spec_b8(&mut self.buf, 0x87, bits);
                emit_modrm_reg(&mut self.buf, regs::enc(src), dst);
                EncodeResult::Zero
            }
            AluOp::Bsf | AluOp::Bsr => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if bits == OpBits::B8 {
                        return EncodeResult::ForceZero32;
                    }
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(if op == AluOp::Bsf { 0xBC } else { 0xBD });
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
                EncodeResult::Zero
            }
            AluOp::Popcnt => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if bits == OpBits::B8 {
                        return EncodeResult::ForceZero32;
                    }
                    return EncodeResult::Zero;
                }
                self.buf.put1(0xF3);
                emit_rex(&mut self.buf, bits, dst, src);
                self.buf.put1(0x0F);
                self.buf.put1(0xB8);
                emit_modrm_reg(&mut self.buf, regs::enc(dst), src);
                EncodeResult::Zero
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("binary reg-reg {op:?} is not encodable");
            }
        }
    }

    pub fn encode_op_binary_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("binary reg-mem: unencodable address");
        }
        if let Some(opcode) = alu_mr_opcode(op) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            emit_rex(&mut self.buf, bits, dst, base);
            emit_spec_b8(&mut self.buf, opcode, bits);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(dst), base);
            return EncodeResult::Zero;
        }
        if op == AluOp::Smul {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            if bits == OpBits::B8 {
                self.encode_load_signed_ext_reg_reg(dst, dst, OpBits::B32, OpBits::B8, EmitFlags::NONE);
            }
            emit_rex(&mut self.buf, bits, dst, base);
            self.buf.put1(0x0F);
            self.buf.put1(0xAF);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(dst), base);
            return EncodeResult::Zero;
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Right2Reg;
        }
        panic!("binary reg-mem {op:?} must be legalized");
    }

    pub fn encode_op_binary_mem_reg(
        &mut self,
        base: Reg,
        offset: u64,
        src: Reg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("binary mem-reg: unencodable address");
        }
        if src.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Left2Reg;
            }
            panic!("binary mem-reg with float source");
        }
        if op.is_div_family() || op == AluOp::Smul {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Left2Reg;
            }
            panic!("binary mem-reg {op:?} must be legalized");
        }
        if matches!(op, AluOp::Shl | AluOp::Sal | AluOp::Shr | AluOp::Sar) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                if src != regs::rcx() {
                    return EncodeResult::Right2Rcx;
                }
                return EncodeResult::Zero;
            }
            debug_assert_eq!(src, regs::rcx());
            if flags.has(EmitFlags::LOCK) {
                self.buf.put1(0xF0);
            }
            emit_rex(&mut self.buf, bits, Reg::INVALID, base);
            emit_spec_b8(&mut self.buf, 0xD3, bits);
            emit_modrm_mem(&mut self.buf, offset, shift_digit(op), base);
            return EncodeResult::Zero;
        }
        if let Some(opcode) = alu_rm_opcode(op) {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            if flags.has(EmitFlags::LOCK) {
                self.buf.put1(0xF0);
            }
            emit_rex(&mut self.buf, bits, src, base);
            emit_spec_b8(&mut self.buf, opcode, bits);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(src), base);
            return EncodeResult::Zero;
        }
        if op == AluOp::Xchg {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Zero;
            }
            if flags.has(EmitFlags::LOCK) {
                self.buf.put1(0xF0);
            }
            emit_rex(&mut self.buf, bits, src, base);
            emit_spec_b8(&mut self.buf, 0x87, bits);
            emit_modrm_mem(&mut self.buf, offset, regs::enc(src), base);
            return EncodeResult::Zero;
        }
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::NotSupported;
        }
        panic!("binary mem-reg {op:?} is not encodable");
    }

    pub fn encode_op_binary_reg_imm(
        &mut self,
        reg: Reg,
        value: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if reg.is_float() {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::Right2Reg;
            }
            panic!("binary reg-imm on float register");
        }
        match op {
            AluOp::Add | AluOp::Sub if value == 1
                && !flags.has(EmitFlags::OVERFLOW)
                && self.opt_level() >= OptLevel::O1 =>
            {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                // inc / dec.
                emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                emit_spec_b8(&mut self.buf, 0xFF, bits);
                let digit = if op == AluOp::Add { 0 } else { 1 };
                emit_modrm_reg(&mut self.buf, digit, reg);
                EncodeResult::Zero
            }
            AluOp::Add | AluOp::Sub | AluOp::And | AluOp::Or | AluOp::Xor => {
                let digit = alu_imm_digit(op).unwrap();
                if bits == OpBits::B8 {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    self.buf.put1(0x80);
                    emit_modrm_reg(&mut self.buf, digit, reg);
                    emit_value(&mut self.buf, value, OpBits::B8);
                } else if can_encode8(value, bits) {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    self.buf.put1(0x83);
                    emit_modrm_reg(&mut self.buf, digit, reg);
                    emit_value(&mut self.buf, value, OpBits::B8);
                } else if value <= 0x7FFF_FFFF {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    self.buf.put1(0x81);
                    emit_modrm_reg(&mut self.buf, digit, reg);
                    emit_value(&mut self.buf, value, bits.min(OpBits::B32));
                } else {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Right2Reg;
                    }
                    panic!("binary reg-imm immediate needs a register");
                }
                EncodeResult::Zero
            }
            AluOp::Sdiv | AluOp::Udiv | AluOp::Srem | AluOp::Urem | AluOp::Umul => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Right2Reg;
                }
                panic!("binary reg-imm {op:?} must be legalized");
            }
            AluOp::Smul => {
                if can_encode8(value, bits) {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    if bits == OpBits::B8 {
                        self.encode_load_signed_ext_reg_reg(reg, reg, OpBits::B32, OpBits::B8, EmitFlags::NONE);
                    }
                    emit_rex(&mut self.buf, bits, reg, reg);
                    self.buf.put1(0x6B);
                    emit_modrm_reg(&mut self.buf, regs::enc(reg), reg);
                    emit_value(&mut self.buf, value, OpBits::B8);
                } else if value <= 0x7FFF_FFFF {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    if bits == OpBits::B8 || bits == OpBits::B16 {
                        self.encode_load_signed_ext_reg_reg(reg, reg, OpBits::B32, bits, EmitFlags::NONE);
                    }
                    emit_rex(&mut self.buf, bits, reg, reg);
                    self.buf.put1(0x69);
                    emit_modrm_reg(&mut self.buf, regs::enc(reg), reg);
                    emit_value(&mut self.buf, value, OpBits::B32);
                } else {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Right2Reg;
                    }
                    panic!("signed multiply immediate needs a register");
                }
                EncodeResult::Zero
            }
            AluOp::Shl | AluOp::Sal | AluOp::Shr | AluOp::Sar => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                debug_assert!(value <= 0x7F);
                if value == 1 {
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    emit_spec_b8(&mut self.buf, 0xD1, bits);
                    emit_modrm_reg(&mut self.buf, shift_digit(op), reg);
                } else {
                    emit_rex(&mut self.buf, bits, Reg::INVALID, reg);
                    emit_spec_b8(&mut self.buf, 0xC1, bits);
                    emit_modrm_reg(&mut self.buf, shift_digit(op), reg);
                    let count = value.min((bits.bits() - 1) as u64);
                    emit_value(&mut self.buf, count, OpBits::B8);
                }
                EncodeResult::Zero
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("binary reg-imm {op:?} is not encodable");
            }
        }
    }

    pub fn encode_op_binary_mem_imm(
        &mut self,
        base: Reg,
        offset: u64,
        value: u64,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if base.is_float() || offset > 0x7FFF_FFFF {
            if flags.has(EmitFlags::CAN_ENCODE) {
                return EncodeResult::NotSupported;
            }
            panic!("binary mem-imm: unencodable address");
        }
        match op {
            AluOp::Sdiv | AluOp::Udiv | AluOp::Srem | AluOp::Urem | AluOp::Smul | AluOp::Umul => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Right2Reg;
                }
                panic!("binary mem-imm {op:?} must be legalized");
            }
            AluOp::Shl | AluOp::Sal | AluOp::Shr | AluOp::Sar => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                if value == 1 {
                    emit_rex(&mut self.buf, bits, Reg::INVALID, base);
                    emit_spec_b8(&mut self.buf, 0xD1, bits);
                    emit_modrm_mem(&mut self.buf, offset, shift_digit(op), base);
                } else {
                    debug_assert!(value <= 0x7F);
                    emit_rex(&mut self.buf, bits, Reg::INVALID, base);
                    emit_spec_b8(&mut self.buf, 0xC1, bits);
                    emit_modrm_mem(&mut self.buf, offset, shift_digit(op), base);
                    let count = value.min((bits.bits() - 1) as u64);
                    emit_value(&mut self.buf, count, OpBits::B8);
                }
                EncodeResult::Zero
            }
            AluOp::Add | AluOp::Sub if value == 1
                && !flags.has(EmitFlags::OVERFLOW)
                && self.opt_level() >= OptLevel::O1 =>
            {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::Zero;
                }
                emit_rex(&mut self.buf, bits, Reg::INVALID, base);
                emit_spec_b8(&mut self.buf, 0xFF, bits);
                let digit = if op == AluOp::Add { 0 } else { 1 };
                emit_modrm_mem(&mut self.buf, offset, digit, base);
                EncodeResult::Zero
            }
            AluOp::Add | AluOp::Sub | AluOp::And | AluOp::Or | AluOp::Xor => {
                let digit = alu_imm_digit(op).unwrap();
                if bits == OpBits::B8 {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    emit_rex(&mut self.buf, bits, Reg::INVALID, base);
                    self.buf.put1(0x80);
                    emit_modrm_mem(&mut self.buf, offset, digit, base);
                    emit_value(&mut self.buf, value, OpBits::B8);
                } else if can_encode8(value, bits) {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    emit_rex(&mut self.buf, bits, Reg::INVALID, base);
                    self.buf.put1(0x83);
                    emit_modrm_mem(&mut self.buf, offset, digit, base);
                    emit_value(&mut self.buf, value, OpBits::B8);
                } else if value <= 0x7FFF_FFFF {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Zero;
                    }
                    emit_rex(&mut self.buf, bits, Reg::INVALID, base);
                    self.buf.put1(0x81);
                    emit_modrm_mem(&mut self.buf, offset, digit, base);
                    emit_value(&mut self.buf, value, bits.min(OpBits::B32));
                } else {
                    if flags.has(EmitFlags::CAN_ENCODE) {
                        return EncodeResult::Right2Reg;
                    }
                    panic!("binary mem-imm immediate needs a register");
                }
                EncodeResult::Zero
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("binary mem-imm {op:?} is not encodable");
            }
        }
    }

    pub fn encode_op_ternary_reg_reg_reg(
        &mut self,
        r0: Reg,
        r1: Reg,
        r2: Reg,
        op: AluOp,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        match op {
            AluOp::Fmuladd => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if !(r0.is_float() && r1.is_float() && r2.is_float()) {
                        return EncodeResult::NotSupported;
                    }
                    return EncodeResult::Zero;
                }
                debug_assert!(r0.is_float() && r1.is_float() && r2.is_float());
                // mul then add, accumulating in r0.
                emit_spec_f64(&mut self.buf, 0xF3, bits);
                self.buf.put1(0x0F);
                self.buf.put1(float_op_opcode(AluOp::Fmul));
                emit_modrm_reg(&mut self.buf, regs::enc(r0), r1);
                emit_spec_f64(&mut self.buf, 0xF3, bits);
                self.buf.put1(0x0F);
                self.buf.put1(float_op_opcode(AluOp::Fadd));
                emit_modrm_reg(&mut self.buf, regs::enc(r0), r2);
                EncodeResult::Zero
            }
            AluOp::Cmpxchg => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    if r0 != regs::rax() {
                        return EncodeResult::Left2Rax;
                    }
                    return EncodeResult::Zero;
                }
                debug_assert_eq!(r0, regs::rax());
                if flags.has(EmitFlags::LOCK) {
                    self.buf.put1(0xF0);
                }
                emit_rex(&mut self.buf, bits, r2, r1);
                self.buf.put1(0x0F);
                emit_spec_b8(&mut self.buf, 0xB1, bits);
                emit_modrm_mem(&mut self.buf, 0, regs::enc(r2), r1);
                EncodeResult::Zero
            }
            _ => {
                if flags.has(EmitFlags::CAN_ENCODE) {
                    return EncodeResult::NotSupported;
                }
                panic!("ternary {op:?} is not encodable");
            }
        }
    }

    // ---- stack, calls, jumps -------------------------------------------

    pub fn encode_push(&mut self, reg: Reg) {
        emit_rex(&mut self.buf, OpBits::Zero, Reg::INVALID, reg);
        self.buf.put1(0x50 | (regs::enc(reg) & 0b111));
    }

    pub fn encode_pop(&mut self, reg: Reg) {
        emit_rex(&mut self.buf, OpBits::Zero, Reg::INVALID, reg);
        self.buf.put1(0x58 | (regs::enc(reg) & 0b111));
    }

    pub fn encode_nop(&mut self) {
        self.buf.put1(0x90);
    }

    pub fn encode_ret(&mut self) {
        self.buf.put1(0xC3);
    }

    pub fn encode_jump_reg(&mut self, reg: Reg) {
        emit_rex(&mut self.buf, OpBits::Zero, Reg::INVALID, reg);
        self.buf.put1(0xFF);
        emit_modrm_reg(&mut self.buf, 4, reg);
    }

    pub fn encode_call_reg(&mut self, reg: Reg) {
        emit_rex(&mut self.buf, OpBits::Zero, Reg::INVALID, reg);
        self.buf.put1(0xFF);
        emit_modrm_reg(&mut self.buf, 2, reg);
    }

    /// Call through the import table: `call [rip + sym]`.
    pub fn encode_call_extern(&mut self, name: &str) {
        self.buf.put1(0xFF);
        emit_modrm_rip(&mut self.buf, 2);
        let sym = self.get_or_add_symbol(name, CpuSymbolKind::Extern);
        let at = self.buf.cur_offset();
        self.add_symbol_relocation(at, sym, Reloc::Rel32);
        self.buf.put4(0);
    }

    /// Direct near call. A target already resolved to a function symbol is
    /// encoded in place; otherwise a REL32 relocation is recorded.
    pub fn encode_call_local(&mut self, name: &str) {
        self.buf.put1(0xE8);
        let sym = self.get_or_add_symbol(name, CpuSymbolKind::Extern);
        let (kind, value) = {
            let s = &self.symbols()[sym as usize];
            (s.kind, s.value)
        };
        if kind == CpuSymbolKind::Function {
            let disp = value as i64 - (self.buf.cur_offset() as i64 + 4);
            self.buf.put4(disp as u32);
        } else {
            let at = self.buf.cur_offset();
            self.add_symbol_relocation(at, sym, Reloc::Rel32);
            self.buf.put4(0);
        }
    }

    /// `lea reg, [rip + symbol + offset]` with a REL32 relocation whose
    /// initial payload is the addend.
    pub fn encode_load_sym_reloc_addr(&mut self, reg: Reg, symbol_index: u32, offset: u32) {
        emit_rex(&mut self.buf, OpBits::B64, reg, Reg::INVALID);
        self.buf.put1(0x8D);
        emit_modrm_rip(&mut self.buf, regs::enc(reg));
        let at = self.buf.cur_offset();
        self.add_symbol_relocation(at, symbol_index, Reloc::Rel32);
        self.buf.put4(offset);
    }

    /// Load a value located at `symbol + offset`: rip-relative for float
    /// and 64-bit loads, or a 64-bit absolute immediate when
    /// `EmitFlags::B64` asks for an address materialization.
    pub fn encode_load_sym_reloc_value(
        &mut self,
        reg: Reg,
        symbol_index: u32,
        offset: u64,
        bits: OpBits,
        flags: EmitFlags,
    ) -> EncodeResult {
        if flags.has(EmitFlags::CAN_ENCODE) {
            return EncodeResult::Zero;
        }
        if reg.is_float() {
            emit_spec_f64(&mut self.buf, 0xF3, bits);
            self.buf.put1(0x0F);
            self.buf.put1(0x10);
            emit_modrm_rip(&mut self.buf, regs::enc(reg));
            let at = self.buf.cur_offset();
            self.add_symbol_relocation(at, symbol_index, Reloc::Rel32);
            self.buf.put4(offset as u32);
        } else if flags.has(EmitFlags::B64) {
            debug_assert_eq!(bits, OpBits::B64);
            emit_rex(&mut self.buf, OpBits::B64, Reg::INVALID, reg);
            self.buf.put1(0xB8 | (regs::enc(reg) & 0b111));
            let at = self.buf.cur_offset();
            self.add_symbol_relocation(at, symbol_index, Reloc::Addr64);
            self.buf.put8(offset);
        } else {
            debug_assert_eq!(bits, OpBits::B64);
            emit_rex(&mut self.buf, bits, reg, Reg::INVALID);
            self.buf.put1(0x8B);
            emit_modrm_rip(&mut self.buf, regs::enc(reg));
            let at = self.buf.cur_offset();
            self.add_symbol_relocation(at, symbol_index, Reloc::Rel32);
            self.buf.put4(offset as u32);
        }
        EncodeResult::Zero
    }

    /// Emit a conditional or unconditional jump with a reserved
    /// displacement, returning the fixup to patch later.
    pub fn encode_jump(&mut self, cond: Cond, bits: OpBits) -> JumpFixup {
        debug_assert!(bits == OpBits::B8 || bits == OpBits::B32);
        if bits == OpBits::B8 {
            self.buf.put1(jcc8_opcode(cond));
            self.buf.put1(0);
        } else if cond == Cond::Unconditional {
            self.buf.put1(0xE9);
            self.buf.put4(0);
        } else {
            self.buf.put1(0x0F);
            // The near forms live 0x10 above the short forms.
            self.buf.put1(jcc8_opcode(cond) + 0x10);
            self.buf.put4(0);
        }
        let width = if bits == OpBits::B8 { 1 } else { 4 };
        JumpFixup {
            patch_offset: self.buf.cur_offset() - width,
            offset_start: self.buf.cur_offset(),
            bits,
        }
    }

    /// Write the displacement of a previously emitted jump. An 8-bit jump
    /// whose target is out of short range is a legalization bug.
    pub fn encode_patch_jump(&mut self, fixup: &JumpFixup, dest: u64) {
        let disp = dest as i64 - fixup.offset_start as i64;
        if fixup.bits == OpBits::B8 {
            assert!(
                (-127..=128).contains(&disp),
                "short jump displacement out of range: {disp}"
            );
            self.buf.patch1(fixup.patch_offset, disp as i8 as u8);
        } else {
            self.buf.patch4(fixup.patch_offset, disp as i32 as u32);
        }
    }

    /// Patch a jump to land at the current offset.
    pub fn encode_patch_jump_here(&mut self, fixup: &JumpFixup) {
        let here = self.buf.cur_offset() as u64;
        self.encode_patch_jump(fixup, here);
    }

    /// Emit the indirect dispatch sequence of a jump table and reserve its
    /// entries in the data segment. Returns the data offset of entry 0 and
    /// the code offset entries are relative to.
    pub fn encode_jump_table(
        &mut self,
        table_reg: Reg,
        index_reg: Reg,
        num_entries: u32,
        data: &mut DataSegment,
        const_symbol: u32,
        fn_symbol: u32,
    ) -> (u32, u32) {
        let table_offset = data.reserve_u32_span(num_entries as usize);
        self.encode_load_sym_reloc_addr(table_reg, const_symbol, table_offset);

        // movsxd table, dword [table + index*4]
        self.encode_amc_reg(
            table_reg,
            OpBits::B64,
            table_reg,
            index_reg,
            4,
            0,
            OpBits::B64,
            AmcOp::Movsxd,
            false,
            EmitFlags::NONE,
        );

        // lea index, [rip + fn + <offset of the end of this sequence>]
        let fn_start = self.function_start();
        self.encode_load_sym_reloc_addr(index_reg, fn_symbol, 0);
        let addend_site = self.buf.cur_offset() - 4;
        self.encode_op_binary_reg_reg(index_reg, table_reg, AluOp::Add, OpBits::B64, EmitFlags::NONE);
        self.encode_jump_reg(index_reg);

        let seq_end = self.buf.cur_offset();
        self.buf.patch4(addend_site, seq_end - fn_start);
        (table_offset, seq_end)
    }

    // ---- generic dispatch ----------------------------------------------

    /// Probe or emit a data instruction by dispatching on its opcode.
    /// Control-flow, label, and call opcodes are owned by the emit pass
    /// and answer `Zero` in probe mode.
    pub fn encode_inst(&mut self, inst: &Inst, ops: &[Operand], flags: EmitFlags) -> EncodeResult {
        use Opcode::*;
        match inst.opcode {
            LoadRegImm => self.encode_load_reg_imm(ops[0].reg(), ops[2].imm(), ops[1].bits(), flags),
            LoadRegReg => self.encode_load_reg_reg(ops[0].reg(), ops[1].reg(), ops[2].bits(), flags),
            LoadRegMem => {
                self.encode_load_reg_mem(ops[0].reg(), ops[1].reg(), ops[3].imm(), ops[2].bits(), flags)
            }
            LoadMemReg => {
                self.encode_load_mem_reg(ops[0].reg(), ops[3].imm(), ops[1].reg(), ops[2].bits(), flags)
            }
            LoadMemImm => {
                self.encode_load_mem_imm(ops[0].reg(), ops[2].imm(), ops[3].imm(), ops[1].bits(), flags)
            }
            LoadZeroExtRegReg => self.encode_load_zero_ext_reg_reg(
                ops[0].reg(),
                ops[1].reg(),
                ops[2].bits(),
                ops[3].bits(),
                flags,
            ),
            LoadZeroExtRegMem => self.encode_load_zero_ext_reg_mem(
                ops[0].reg(),
                ops[1].reg(),
                ops[4].imm(),
                ops[2].bits(),
                ops[3].bits(),
                flags,
            ),
            LoadSignedExtRegReg => self.encode_load_signed_ext_reg_reg(
                ops[0].reg(),
                ops[1].reg(),
                ops[2].bits(),
                ops[3].bits(),
                flags,
            ),
            LoadSignedExtRegMem => self.encode_load_signed_ext_reg_mem(
                ops[0].reg(),
                ops[1].reg(),
                ops[4].imm(),
                ops[2].bits(),
                ops[3].bits(),
                flags,
            ),
            LoadAddrRegMem => self.encode_load_addr_reg_mem(
                ops[0].reg(),
                ops[1].reg(),
                ops[3].imm(),
                ops[2].bits(),
                flags,
            ),
            LoadAddrAmcRegMem => self.encode_load_addr_amc_reg_mem(
                ops[0].reg(),
                ops[1].reg(),
                ops[2].reg(),
                ops[5].imm(),
                ops[6].imm(),
                ops[3].bits(),
                ops[4].bits(),
                flags,
            ),
            LoadAmcRegMem => self.encode_load_amc_reg_mem(
                ops[0].reg(),
                ops[1].reg(),
                ops[2].reg(),
                ops[5].imm(),
                ops[6].imm(),
                ops[3].bits(),
                ops[4].bits(),
                flags,
            ),
            LoadAmcMemReg => self.encode_load_amc_mem_reg(
                ops[0].reg(),
                ops[1].reg(),
                ops[5].imm(),
                ops[6].imm(),
                ops[3].bits(),
                ops[2].reg(),
                ops[4].bits(),
                flags,
            ),
            LoadAmcMemImm => self.encode_load_amc_mem_imm(
                ops[0].reg(),
                ops[1].reg(),
                ops[4].imm(),
                ops[5].imm(),
                ops[2].bits(),
                ops[6].imm(),
                ops[3].bits(),
                flags,
            ),
            OpUnaryReg => self.encode_op_unary_reg(ops[0].reg(), ops[1].alu_op(), ops[2].bits(), flags),
            OpUnaryMem => self.encode_op_unary_mem(
                ops[0].reg(),
                ops[3].imm(),
                ops[1].alu_op(),
                ops[2].bits(),
                flags,
            ),
            OpBinaryRegReg => self.encode_op_binary_reg_reg(
                ops[0].reg(),
                ops[1].reg(),
                ops[3].alu_op(),
                ops[2].bits(),
                flags,
            ),
            OpBinaryRegImm => self.encode_op_binary_reg_imm(
                ops[0].reg(),
                ops[3].imm(),
                ops[2].alu_op(),
                ops[1].bits(),
                flags,
            ),
            OpBinaryRegMem => self.encode_op_binary_reg_mem(
                ops[0].reg(),
                ops[1].reg(),
                ops[4].imm(),
                ops[3].alu_op(),
                ops[2].bits(),
                flags,
            ),
            OpBinaryMemReg => self.encode_op_binary_mem_reg(
                ops[0].reg(),
                ops[4].imm(),
                ops[1].reg(),
                ops[3].alu_op(),
                ops[2].bits(),
                flags,
            ),
            OpBinaryMemImm => self.encode_op_binary_mem_imm(
                ops[0].reg(),
                ops[3].imm(),
                ops[4].imm(),
                ops[2].alu_op(),
                ops[1].bits(),
                flags,
            ),
            OpTernaryRegRegReg => self.encode_op_ternary_reg_reg_reg(
                ops[0].reg(),
                ops[1].reg(),
                ops[2].reg(),
                ops[3].alu_op(),
                ops[4].bits(),
                flags,
            ),
            CmpRegReg => self.encode_cmp_reg_reg(ops[0].reg(), ops[1].reg(), ops[2].bits(), flags),
            CmpRegImm => self.encode_cmp_reg_imm(ops[0].reg(), ops[2].imm(), ops[1].bits(), flags),
            CmpRegZero => self.encode_cmp_reg_zero(ops[0].reg(), ops[1].bits(), flags),
            CmpMemReg => {
                self.encode_cmp_mem_reg(ops[0].reg(), ops[3].imm(), ops[1].reg(), ops[2].bits(), flags)
            }
            CmpMemImm => {
                self.encode_cmp_mem_imm(ops[0].reg(), ops[2].imm(), ops[3].imm(), ops[1].bits(), flags)
            }
            SetCondReg => self.encode_set_cond_reg(ops[0].reg(), ops[1].cond(), flags),
            LoadCondRegReg => self.encode_load_cond_reg_reg(
                ops[0].reg(),
                ops[1].reg(),
                ops[2].cond(),
                ops[3].bits(),
                flags,
            ),
            ClearReg => self.encode_clear_reg(ops[0].reg(), ops[1].bits(), flags),
            // Control flow, labels, and calls are sequenced by the emit
            // pass; they are always "encodable".
            JumpCond | JumpCondImm | JumpReg | JumpTable | Ret | Label | Debug | Nop | Push
            | Pop | CallLocal | CallExtern | CallReg | LoadSymRelocAddr | LoadSymRelocValue => {
                debug_assert!(flags.has(EmitFlags::CAN_ENCODE), "{:?} is emitted by the emit pass", inst.opcode);
                EncodeResult::Zero
            }
        }
    }
}
