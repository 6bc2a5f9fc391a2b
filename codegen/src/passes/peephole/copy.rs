//! Copy rules: forward copies into consumers, fold copy/op/copy-back
//! triangles, and coalesce copies whose destination can be renamed away.

use crate::ir::info;
use crate::ir::instructions::{Opcode, Operand};
use crate::passes::folding::violates_encoder_conformance;
use crate::passes::peephole::{is_copy_dead_after, Cursor};
use crate::passes::PassContext;
use ingot_entity::Ref;

/// `mov tmp, src; op dst, tmp` -> `op dst, src` when `tmp` dies there.
pub(super) fn forward_copy_into_next_binary_source(ctx: &mut PassContext, cur: &Cursor) -> bool {
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
    let copy_dst = ops[0].reg();
    let copy_src = ops[1].reg();
    if next_ops[1].reg() != copy_dst {
        return false;
    }
    if next_ops[0].reg() == copy_dst {
        return false;
    }
    if ops[2].bits() != next_ops[2].bits() {
        return false;
    }
    if !copy_dst.is_same_class(copy_src) {
        return false;
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), copy_dst) {
        return false;
    }

    ctx.operands.slice_mut(&next_inst)[1] = Operand::Reg(copy_src);
    if violates_encoder_conformance(ctx.encoder, &next_inst, ctx.operands.slice(&next_inst)) {
        ctx.operands.slice_mut(&next_inst)[1] = Operand::Reg(copy_dst);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, src; cmp ... tmp ...` -> compare against `src` directly.
pub(super) fn forward_copy_into_next_compare_source(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    let ops = ctx.operands.snapshot(&inst);
    let next_ops = ctx.operands.snapshot(&next_inst);
    let copy_dst = ops[0].reg();
    let copy_src = ops[1].reg();
    if !copy_dst.is_same_class(copy_src) {
        return false;
    }

    let mut replaced = false;
    {
        let m = ctx.operands.block_mut(&next_inst);
        match next_inst.opcode {
            Opcode::CmpRegReg => {
                if ops[2].bits() != next_ops[2].bits() {
                    return false;
                }
                if next_ops[0].reg() == copy_dst {
                    m[0] = Operand::Reg(copy_src);
                    replaced = true;
                }
                if next_ops[1].reg() == copy_dst {
                    m[1] = Operand::Reg(copy_src);
                    replaced = true;
                }
            }
            Opcode::CmpRegImm | Opcode::CmpRegZero => {
                if ops[2].bits() != next_ops[1].bits() {
                    return false;
                }
                if next_ops[0].reg() == copy_dst {
                    m[0] = Operand::Reg(copy_src);
                    replaced = true;
                }
            }
            _ => return false,
        }
    }
    if !replaced {
        return false;
    }

    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), copy_dst) {
        ctx.operands.restore(&next_inst, next_ops);
        return false;
    }
    if violates_encoder_conformance(ctx.encoder, &next_inst, ctx.operands.slice(&next_inst)) {
        ctx.operands.restore(&next_inst, next_ops);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov alias, base; mov r1, [alias+off]; mov r2, [alias+off]` reuses the
/// first load: `mov r1, [base+off]; mov r2, r1`.
pub(super) fn fold_copy_twin_load_mem_reuse(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let first_ref = cur.next;
    let first_load = match ctx.inst(first_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if first_load.opcode != Opcode::LoadRegMem {
        return false;
    }
    let second_ref = ctx.insts.next(first_ref);
    let second_load = match ctx.inst(second_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if second_load.opcode != Opcode::LoadRegMem {
        return false;
    }

    let ops = ctx.operands.snapshot(&inst);
    let first_ops = ctx.operands.snapshot(&first_load);
    let second_ops = ctx.operands.snapshot(&second_load);
    let alias = ops[0].reg();
    let base = ops[1].reg();
    if !alias.is_same_class(base) {
        return false;
    }
    if first_ops[1].reg() != alias || second_ops[1].reg() != alias {
        return false;
    }
    if first_ops[0].reg() != base {
        return false;
    }
    if first_ops[0].reg() == second_ops[0].reg() {
        return false;
    }
    if !first_ops[0].reg().is_same_class(second_ops[0].reg()) {
        return false;
    }
    if first_ops[2].bits() != second_ops[2].bits() {
        return false;
    }
    if first_ops[3].imm() != second_ops[3].imm() {
        return false;
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(second_ref), alias) {
        return false;
    }

    ctx.operands.slice_mut(&first_load)[1] = Operand::Reg(base);
    if violates_encoder_conformance(ctx.encoder, &first_load, ctx.operands.slice(&first_load)) {
        ctx.operands.restore(&first_load, first_ops);
        return false;
    }

    let loaded = first_ops[0].reg();
    {
        let m = ctx.operands.block_mut(&second_load);
        m[1] = Operand::Reg(loaded);
        m[2] = second_ops[2];
    }
    let slot = ctx.insts.get_mut(second_ref).unwrap();
    slot.opcode = Opcode::LoadRegReg;
    slot.num_operands = 3;

    let rewritten = ctx.inst(second_ref).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.operands.restore(&first_load, first_ops);
        let slot = ctx.insts.get_mut(second_ref).unwrap();
        slot.opcode = Opcode::LoadRegMem;
        slot.num_operands = 4;
        ctx.operands.restore(&rewritten, second_ops);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, src; op tmp, other; mov src, tmp` -> `op src, other`.
pub(super) fn fold_copy_op_copy_back(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let op_ref = cur.next;
    let op_inst = match ctx.inst(op_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if op_inst.opcode != Opcode::OpBinaryRegReg {
        return false;
    }
    let back_ref = ctx.insts.next(op_ref);
    let back_inst = match ctx.inst(back_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if back_inst.opcode != Opcode::LoadRegReg {
        return false;
    }

    let ops = ctx.operands.snapshot(&inst);
    let op_ops = ctx.operands.snapshot(&op_inst);
    let back_ops = ctx.operands.snapshot(&back_inst);
    let tmp = ops[0].reg();
    let src = ops[1].reg();
    if !tmp.is_same_class(src) {
        return false;
    }
    if op_ops[0].reg() != tmp {
        return false;
    }
    if back_ops[0].reg() != src || back_ops[1].reg() != tmp {
        return false;
    }
    if ops[2].bits() != op_ops[2].bits() || ops[2].bits() != back_ops[2].bits() {
        return false;
    }
    if op_ops[1].reg() == src {
        return false;
    }

    ctx.operands.slice_mut(&op_inst)[0] = Operand::Reg(src);
    if violates_encoder_conformance(ctx.encoder, &op_inst, ctx.operands.slice(&op_inst)) {
        ctx.operands.slice_mut(&op_inst)[0] = Operand::Reg(tmp);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    ctx.insts.erase(back_ref);
    true
}

/// `mov tmp, src; neg tmp; mov src, tmp` -> `neg src`.
pub(super) fn fold_copy_unary_copy_back(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let unary_ref = cur.next;
    let unary_inst = match ctx.inst(unary_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if unary_inst.opcode != Opcode::OpUnaryReg {
        return false;
    }
    let back_ref = ctx.insts.next(unary_ref);
    let back_inst = match ctx.inst(back_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if back_inst.opcode != Opcode::LoadRegReg {
        return false;
    }

    let ops = ctx.operands.snapshot(&inst);
    let unary_ops = ctx.operands.snapshot(&unary_inst);
    let back_ops = ctx.operands.snapshot(&back_inst);
    let tmp = ops[0].reg();
    let src = ops[1].reg();
    if !tmp.is_same_class(src) {
        return false;
    }
    if unary_ops[0].reg() != tmp {
        return false;
    }
    if back_ops[0].reg() != src || back_ops[1].reg() != tmp {
        return false;
    }
    if ops[2].bits() != unary_ops[2].bits() || ops[2].bits() != back_ops[2].bits() {
        return false;
    }

    ctx.operands.slice_mut(&unary_inst)[0] = Operand::Reg(src);
    if violates_encoder_conformance(ctx.encoder, &unary_inst, ctx.operands.slice(&unary_inst)) {
        ctx.operands.slice_mut(&unary_inst)[0] = Operand::Reg(tmp);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    ctx.insts.erase(back_ref);
    true
}

/// The dual of [`fold_copy_op_copy_back`], recognized from the trailing
/// copy-back instruction.
pub(super) fn fold_copy_back_with_previous_op(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let op_ref = ctx.insts.prev(cur.inst_ref);
    if !op_ref.is_valid() {
        return false;
    }
    let copy_ref = ctx.insts.prev(op_ref);
    if !copy_ref.is_valid() {
        return false;
    }
    let op_inst = match ctx.inst(op_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if op_inst.opcode != Opcode::OpBinaryRegReg {
        return false;
    }
    let copy_inst = match ctx.inst(copy_ref) {
        Some(inst) => inst,
        None => return false,
    };
    if copy_inst.opcode != Opcode::LoadRegReg {
        return false;
    }

    let ops = ctx.operands.snapshot(&inst);
    let op_ops = ctx.operands.snapshot(&op_inst);
    let copy_ops = ctx.operands.snapshot(&copy_inst);
    let orig = ops[0].reg();
    let tmp = ops[1].reg();
    if !orig.is_same_class(tmp) {
        return false;
    }
    if op_ops[0].reg() != tmp {
        return false;
    }
    if copy_ops[0].reg() != tmp || copy_ops[1].reg() != orig {
        return false;
    }
    if op_ops[1].reg() == orig {
        return false;
    }
    if ops[2].bits() != op_ops[2].bits() || ops[2].bits() != copy_ops[2].bits() {
        return false;
    }

    ctx.operands.slice_mut(&op_inst)[0] = Operand::Reg(orig);
    if violates_encoder_conformance(ctx.encoder, &op_inst, ctx.operands.slice(&op_inst)) {
        ctx.operands.slice_mut(&op_inst)[0] = Operand::Reg(tmp);
        return false;
    }

    ctx.insts.erase(copy_ref);
    ctx.insts.erase(cur.inst_ref);
    true
}

/// Decide whether every downstream use of `dst` in the local region can be
/// renamed to `src`, probing the encoder for each candidate slot.
fn analyze_copy_coalescing(ctx: &mut PassContext, start: Ref, dst: crate::ir::Reg, src: crate::ir::Reg) -> bool {
    let mut saw_replaceable = false;
    let mut seen_mutation = false;

    let mut r = start;
    while r.is_valid() {
        let inst = match ctx.inst(r) {
            Some(inst) => inst,
            None => break,
        };
        let use_def = ctx.use_def(&inst);
        if info::is_local_dataflow_barrier(&inst, &use_def) {
            break;
        }
        let ops = ctx.operands.snapshot(&inst);
        if inst.opcode == Opcode::LoadRegReg && ops[0].reg() == src && ops[1].reg() == dst {
            // A reversed copy would swap roles; give up.
            return false;
        }

        for ro in info::reg_operands(&inst) {
            let slot = ro.slot as usize;
            let reg = ops[slot].reg();
            if reg == src && (seen_mutation || ro.is_def) {
                return false;
            }
            if reg != dst {
                continue;
            }
            if ro.is_def && !ro.is_use {
                return false;
            }
            if ro.is_use && ro.is_def {
                seen_mutation = true;
                saw_replaceable = true;
                continue;
            }
            if ro.is_use {
                ctx.operands.slice_mut(&inst)[slot] = Operand::Reg(src);
                let bad = violates_encoder_conformance(
                    ctx.encoder,
                    &inst,
                    ctx.operands.slice(&inst),
                );
                ctx.operands.slice_mut(&inst)[slot] = Operand::Reg(dst);
                if bad {
                    return false;
                }
                saw_replaceable = true;
            }
        }
        r = ctx.insts.next(r);
    }

    saw_replaceable
}

fn apply_copy_coalescing(ctx: &mut PassContext, start: Ref, dst: crate::ir::Reg, src: crate::ir::Reg) -> bool {
    let mut changed = false;
    let mut r = start;
    while r.is_valid() {
        let inst = match ctx.inst(r) {
            Some(inst) => inst,
            None => break,
        };
        let use_def = ctx.use_def(&inst);
        if info::is_local_dataflow_barrier(&inst, &use_def) {
            break;
        }
        for ro in info::reg_operands(&inst) {
            let slot = ro.slot as usize;
            if !ro.is_use {
                continue;
            }
            if ctx.operands.slice(&inst)[slot].reg() != dst {
                continue;
            }
            ctx.operands.slice_mut(&inst)[slot] = Operand::Reg(src);
            changed = true;
        }
        r = ctx.insts.next(r);
    }
    changed
}

/// Rewrite every downstream use of the copy destination to the source and
/// erase the copy, when the local region allows it.
pub(super) fn coalesce_copy_instruction(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let ops = ctx.operands.snapshot(&inst);
    let dst = ops[0].reg();
    let src = ops[1].reg();
    if dst == src || !dst.is_same_class(src) {
        return false;
    }

    if !analyze_copy_coalescing(ctx, cur.next, dst, src) {
        return false;
    }
    if !apply_copy_coalescing(ctx, cur.next, dst, src) {
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// A copy whose destination is immediately overwritten by another copy is
/// dead.
pub(super) fn remove_overwritten_copy(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::LoadRegReg {
        return false;
    }
    let ops = ctx.ops(&inst);
    let next_ops = ctx.ops(&next_inst);
    if ops[0].reg() != next_ops[0].reg() || ops[2].bits() != next_ops[2].bits() {
        return false;
    }
    if next_ops[1].reg() == ops[0].reg() {
        return false;
    }
    ctx.insts.erase(cur.inst_ref);
    true
}
