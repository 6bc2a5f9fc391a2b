//! Immediate rules: fold immediate loads into their single consumer and
//! merge immediate arithmetic.

use crate::ir::info;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::passes::folding::violates_encoder_conformance;
use crate::passes::peephole::{are_flags_dead_after, is_copy_dead_after, is_temp_dead_for_address_fold, Cursor};
use crate::passes::PassContext;
use ingot_entity::Ref;

/// Two same-register add/sub immediates, possibly separated by one neutral
/// instruction, collapse into a single adjustment.
///
/// Example: `add rax, 4; mov r9, rcx; add rax, 8` -> `add rax, 12; mov r9, rcx`.
pub(super) fn merge_regimm_arithmetic_with_next(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let ops = ctx.operands.snapshot(&inst);
    let merged_reg = ops[0].reg();
    let bits = ops[1].bits();
    let op = ops[2].alu_op();
    if !merged_reg.is_valid() || merged_reg.is_no_base() {
        return false;
    }
    if op != AluOp::Add && op != AluOp::Sub {
        return false;
    }

    let matches_adjustment = |ctx: &PassContext, r: Ref| -> Option<u64> {
        let candidate = ctx.inst(r)?;
        if candidate.opcode != Opcode::OpBinaryRegImm {
            return None;
        }
        let c = ctx.ops(&candidate);
        if c[0].reg() != merged_reg || c[1].bits() != bits || c[2].alu_op() != op {
            return None;
        }
        Some(c[3].imm())
    };

    let is_neutral = |ctx: &PassContext, r: Ref| -> bool {
        let candidate = match ctx.inst(r) {
            Some(inst) => inst,
            None => return false,
        };
        let use_def = ctx.use_def(&candidate);
        if use_def.is_call || info::is_local_dataflow_barrier(&candidate, &use_def) {
            return false;
        }
        if info::uses_cpu_flags(&candidate) {
            return false;
        }
        !use_def.uses.contains(&merged_reg) && !use_def.defs.contains(&merged_reg)
    };

    let second = if matches_adjustment(ctx, cur.next).is_some() {
        cur.next
    } else {
        if !cur.next.is_valid() || !is_neutral(ctx, cur.next) {
            return false;
        }
        let after = ctx.insts.next(cur.next);
        if matches_adjustment(ctx, after).is_none() {
            return false;
        }
        after
    };
    let second_imm = matches_adjustment(ctx, second).unwrap();

    if !are_flags_dead_after(ctx, ctx.insts.next(second)) {
        return false;
    }

    let mut combined = ops[3].imm().wrapping_add(second_imm);
    if bits != OpBits::B64 {
        combined &= bits.mask();
    }

    let old_imm = ops[3];
    ctx.operands.slice_mut(&inst)[3] = Operand::Imm(combined);
    if violates_encoder_conformance(ctx.encoder, &inst, ctx.operands.slice(&inst)) {
        ctx.operands.slice_mut(&inst)[3] = old_imm;
        return false;
    }

    ctx.insts.erase(second);
    true
}

/// `mov tmp, imm; mov dst, tmp` -> `mov dst, imm` (masked to the copy
/// width).
pub(super) fn fold_loadimm_into_next_copy(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::LoadRegReg {
        return false;
    }
    let ops = ctx.operands.snapshot(&inst);
    let next_ops = ctx.operands.snapshot(&next_inst);
    let tmp = ops[0].reg();
    if next_ops[1].reg() != tmp {
        return false;
    }
    if ops[1].bits() != next_ops[2].bits() {
        return false;
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), tmp) {
        return false;
    }

    let bits = next_ops[2].bits();
    let mut value = ops[2].imm();
    if bits != OpBits::B64 {
        value &= bits.mask();
    }

    {
        let m = ctx.operands.block_mut(&next_inst);
        m[1] = Operand::Bits(bits);
        m[2] = Operand::Imm(value);
    }
    ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::LoadRegImm;

    let rewritten = ctx.inst(cur.next).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::LoadRegReg;
        ctx.operands.restore(&rewritten, next_ops);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, imm; op dst, tmp` -> `op dst, imm`.
pub(super) fn fold_loadimm_into_next_binary(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::OpBinaryRegReg {
        return false;
    }
    let ops = ctx.operands.snapshot(&inst);
    let next_ops = ctx.operands.snapshot(&next_inst);
    let tmp = ops[0].reg();
    if next_ops[1].reg() != tmp || next_ops[0].reg() == tmp {
        return false;
    }
    if ops[1].bits() != next_ops[2].bits() {
        return false;
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), tmp) {
        return false;
    }

    let bits = next_ops[2].bits();
    let mut value = ops[2].imm();
    if bits != OpBits::B64 {
        value &= bits.mask();
    }

    {
        let m = ctx.operands.block_mut(&next_inst);
        m[1] = Operand::Bits(bits);
        m[2] = next_ops[3]; // the micro-op
        m[3] = Operand::Imm(value);
    }
    ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::OpBinaryRegImm;

    let rewritten = ctx.inst(cur.next).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::OpBinaryRegReg;
        ctx.operands.restore(&rewritten, next_ops);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, imm; cmp lhs, tmp` -> `cmp lhs, imm`.
pub(super) fn fold_loadimm_into_next_compare(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::CmpRegReg {
        return false;
    }
    let ops = ctx.operands.snapshot(&inst);
    let next_ops = ctx.operands.snapshot(&next_inst);
    let tmp = ops[0].reg();
    if next_ops[1].reg() != tmp || next_ops[0].reg() == tmp {
        return false;
    }
    if ops[1].bits() != next_ops[2].bits() {
        return false;
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), tmp) {
        return false;
    }

    let bits = next_ops[2].bits();
    let mut value = ops[2].imm();
    if bits != OpBits::B64 {
        value &= bits.mask();
    }

    {
        let m = ctx.operands.block_mut(&next_inst);
        m[1] = Operand::Bits(bits);
        m[2] = Operand::Imm(value);
    }
    ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::CmpRegImm;

    let rewritten = ctx.inst(cur.next).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::CmpRegReg;
        ctx.operands.restore(&rewritten, next_ops);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, imm; ...; mov [base+off], tmp` -> `mov [base+off], imm`, the
/// store width narrowing the immediate.
pub(super) fn fold_loadimm_into_next_mem_store(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let ops = ctx.operands.snapshot(&inst);
    if ops[1].bits() != OpBits::B64 {
        return false;
    }
    let tmp = ops[0].reg();

    let mut scan = cur.next;
    while scan.is_valid() {
        let scan_inst = match ctx.inst(scan) {
            Some(inst) => inst,
            None => return false,
        };
        let use_def = ctx.use_def(&scan_inst);
        if use_def.defs.contains(&tmp) {
            return false;
        }
        if !use_def.uses.contains(&tmp) {
            if info::is_local_dataflow_barrier(&scan_inst, &use_def) {
                return false;
            }
            scan = ctx.insts.next(scan);
            continue;
        }

        let scan_ops = ctx.operands.snapshot(&scan_inst);
        if scan_inst.opcode != Opcode::LoadMemReg || scan_ops[1].reg() != tmp {
            return false;
        }
        if scan_ops[0].reg() == tmp {
            return false;
        }
        if !is_temp_dead_for_address_fold(ctx, ctx.insts.next(scan), tmp) {
            return false;
        }

        let store_bits = scan_ops[2].bits();
        let mut value = ops[2].imm();
        if store_bits != OpBits::B64 {
            value &= store_bits.mask();
        }

        {
            let m = ctx.operands.block_mut(&scan_inst);
            m[1] = Operand::Bits(store_bits);
            m[2] = scan_ops[3]; // offset
            m[3] = Operand::Imm(value);
        }
        ctx.insts.get_mut(scan).unwrap().opcode = Opcode::LoadMemImm;

        let rewritten = ctx.inst(scan).unwrap();
        if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
            ctx.insts.get_mut(scan).unwrap().opcode = Opcode::LoadMemReg;
            ctx.operands.restore(&rewritten, scan_ops);
            return false;
        }

        ctx.insts.erase(cur.inst_ref);
        return true;
    }
    false
}

/// Two 32-bit immediate stores at consecutive offsets merge into one
/// 64-bit store.
///
/// Example: `mov dword [rdx], 1; mov dword [rdx+4], 2`
/// -> `mov qword [rdx], 0x0000000200000001`.
pub(super) fn fold_adjacent_memimm32_stores(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::LoadMemImm {
        return false;
    }
    let ops = ctx.operands.snapshot(&inst);
    let next_ops = ctx.operands.snapshot(&next_inst);
    if ops[1].bits() != OpBits::B32 || next_ops[1].bits() != OpBits::B32 {
        return false;
    }
    if ops[0].reg() != next_ops[0].reg() {
        return false;
    }
    let first_off = ops[2].imm();
    let next_off = next_ops[2].imm();
    match first_off.checked_add(4) {
        Some(adj) if adj == next_off => {}
        _ => return false,
    }

    let lo = ops[3].imm() & OpBits::B32.mask();
    let hi = next_ops[3].imm() & OpBits::B32.mask();
    let merged = lo | (hi << 32);

    {
        let m = ctx.operands.block_mut(&inst);
        m[1] = Operand::Bits(OpBits::B64);
        m[3] = Operand::Imm(merged);
    }
    if violates_encoder_conformance(ctx.encoder, &inst, ctx.operands.slice(&inst)) {
        ctx.operands.restore(&inst, ops);
        return false;
    }

    ctx.insts.erase(cur.next);
    true
}
