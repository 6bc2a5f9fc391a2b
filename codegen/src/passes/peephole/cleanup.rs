//! Cleanup rules: canonical forms and no-op removal.

use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::OpBits;
use crate::passes::folding::{is_no_op_instruction, violates_encoder_conformance};
use crate::passes::peephole::{is_copy_dead_after, Cursor};
use crate::passes::PassContext;

/// `cmp r, 0` -> the dedicated zero-compare form.
pub(super) fn canonicalize_cmp_reg_imm_zero(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    if inst.opcode != Opcode::CmpRegImm {
        return false;
    }
    if ctx.ops(&inst)[2].imm() != 0 {
        return false;
    }
    let slot = ctx.insts.get_mut(cur.inst_ref).unwrap();
    slot.opcode = Opcode::CmpRegZero;
    slot.num_operands = 2;
    true
}

/// `setcc tmp; movzx tmp, tmp (32<-8); mov dst, tmp` routes the setcc and
/// the widening straight to `dst`.
pub(super) fn fold_setcond_zeroext_copy(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    if inst.opcode != Opcode::SetCondReg {
        return false;
    }
    let zext_ref = cur.next;
    let zext_inst = match ctx.inst(zext_ref) {
        Some(i) => i,
        None => return false,
    };
    if zext_inst.opcode != Opcode::LoadZeroExtRegReg {
        return false;
    }
    let copy_ref = ctx.insts.next(zext_ref);
    let copy_inst = match ctx.inst(copy_ref) {
        Some(i) => i,
        None => return false,
    };
    if copy_inst.opcode != Opcode::LoadRegReg {
        return false;
    }

    let ops = ctx.operands.snapshot(&inst);
    let zext_ops = ctx.operands.snapshot(&zext_inst);
    let copy_ops = ctx.operands.snapshot(&copy_inst);
    let tmp = ops[0].reg();
    if zext_ops[0].reg() != tmp || zext_ops[1].reg() != tmp {
        return false;
    }
    if zext_ops[2].bits() != OpBits::B32 || zext_ops[3].bits() != OpBits::B8 {
        return false;
    }
    if copy_ops[1].reg() != tmp {
        return false;
    }
    let dst = copy_ops[0].reg();
    if !dst.is_same_class(tmp) {
        return false;
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(copy_ref), tmp) {
        return false;
    }

    ctx.operands.slice_mut(&inst)[0] = Operand::Reg(dst);
    if violates_encoder_conformance(ctx.encoder, &inst, ctx.operands.slice(&inst)) {
        ctx.operands.slice_mut(&inst)[0] = Operand::Reg(tmp);
        return false;
    }

    {
        let m = ctx.operands.block_mut(&zext_inst);
        m[0] = Operand::Reg(dst);
        m[1] = Operand::Reg(dst);
    }
    if violates_encoder_conformance(ctx.encoder, &zext_inst, ctx.operands.slice(&zext_inst)) {
        ctx.operands.slice_mut(&inst)[0] = Operand::Reg(tmp);
        ctx.operands.restore(&zext_inst, zext_ops);
        return false;
    }

    ctx.insts.erase(copy_ref);
    true
}

/// Erase instructions the encoder classifies as true no-ops.
pub(super) fn remove_no_op_instruction(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    if !is_no_op_instruction(&inst, ctx.ops(&inst)) {
        return false;
    }
    ctx.insts.erase(cur.inst_ref);
    true
}
