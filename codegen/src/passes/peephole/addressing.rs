//! Addressing rules: fold temporary address registers and scaled-indexed
//! computations into the memory accesses that consume them.

use crate::ir::info;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::ir::storage::insert_inst_before;
use crate::passes::folding::violates_encoder_conformance;
use crate::passes::peephole::{are_flags_dead_after, is_copy_dead_after, is_temp_dead_for_address_fold, Cursor};
use crate::passes::PassContext;

/// `mov tmp, 0` followed by a scaled-indexed access using `tmp` as the
/// index collapses into the equivalent non-indexed access.
///
/// Example: `mov r11, 0; mov rax, [rdx + r11*8 + 16]` -> `mov rax, [rdx + 16]`.
pub(super) fn fold_zero_index_amc_from_immediate(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let ops = ctx.ops(&inst);
    if ops[2].imm() != 0 {
        return false;
    }
    let bits = ops[1].bits();
    if bits != OpBits::B32 && bits != OpBits::B64 {
        return false;
    }
    let index_reg = ops[0].reg();

    let mut scan = cur.next;
    while scan.is_valid() {
        let scan_inst = match ctx.inst(scan) {
            Some(inst) => inst,
            None => return false,
        };
        let use_def = ctx.use_def(&scan_inst);
        let has_use = use_def.uses.contains(&index_reg);
        let has_def = use_def.defs.contains(&index_reg);
        if has_def {
            return false;
        }
        if !has_use {
            if info::is_local_dataflow_barrier(&scan_inst, &use_def) {
                return false;
            }
            scan = ctx.insts.next(scan);
            continue;
        }
        if !is_temp_dead_for_address_fold(ctx, ctx.insts.next(scan), index_reg) {
            return false;
        }

        let old = ctx.operands.snapshot(&scan_inst);
        let old_opcode = scan_inst.opcode;
        let old_num = scan_inst.num_operands;

        match scan_inst.opcode {
            Opcode::LoadAddrAmcRegMem | Opcode::LoadAmcRegMem => {
                // [dst, base, index, dst_bits, amc_bits, scale, disp]
                if old[2].reg() != index_reg {
                    return false;
                }
                let m = ctx.operands.block_mut(&scan_inst);
                m[2] = Operand::Bits(old[3].bits());
                m[3] = Operand::Imm(old[6].imm());
                let slot = ctx.insts.get_mut(scan).unwrap();
                slot.opcode = if old_opcode == Opcode::LoadAmcRegMem {
                    Opcode::LoadRegMem
                } else {
                    Opcode::LoadAddrRegMem
                };
                slot.num_operands = 4;
            }
            Opcode::LoadAmcMemReg => {
                // [base, index, src, amc_bits, src_bits, scale, disp]
                if old[1].reg() != index_reg {
                    return false;
                }
                let m = ctx.operands.block_mut(&scan_inst);
                m[1] = old[2];
                m[2] = Operand::Bits(old[4].bits());
                m[3] = Operand::Imm(old[6].imm());
                let slot = ctx.insts.get_mut(scan).unwrap();
                slot.opcode = Opcode::LoadMemReg;
                slot.num_operands = 4;
            }
            Opcode::LoadAmcMemImm => {
                // [base, index, amc_bits, val_bits, scale, disp, imm]
                if old[1].reg() != index_reg {
                    return false;
                }
                let m = ctx.operands.block_mut(&scan_inst);
                m[1] = Operand::Bits(old[3].bits());
                m[2] = Operand::Imm(old[5].imm());
                m[3] = old[6];
                let slot = ctx.insts.get_mut(scan).unwrap();
                slot.opcode = Opcode::LoadMemImm;
                slot.num_operands = 4;
            }
            _ => return false,
        }

        let rewritten = ctx.inst(scan).unwrap();
        if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
            let slot = ctx.insts.get_mut(scan).unwrap();
            slot.opcode = old_opcode;
            slot.num_operands = old_num;
            ctx.operands.restore(&rewritten, old);
            return false;
        }

        ctx.insts.erase(cur.inst_ref);
        return true;
    }
    false
}

/// `mov tmp, base; add tmp, disp` with dead flags becomes
/// `lea tmp, [base + disp]`.
pub(super) fn fold_copy_add_into_load_address(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::OpBinaryRegImm {
        return false;
    }
    let ops = ctx.ops(&inst);
    let next_ops = ctx.ops(&next_inst);
    let tmp = ops[0].reg();
    let base = ops[1].reg();
    if next_ops[0].reg() != tmp {
        return false;
    }
    if ops[2].bits() != OpBits::B64 || next_ops[1].bits() != OpBits::B64 {
        return false;
    }
    if next_ops[2].alu_op() != AluOp::Add {
        return false;
    }
    if !tmp.is_same_class(base) {
        return false;
    }
    let offset = next_ops[3].imm();
    if !are_flags_dead_after(ctx, ctx.insts.next(cur.next)) {
        return false;
    }

    let old = ctx.operands.snapshot(&next_inst);
    {
        let m = ctx.operands.block_mut(&next_inst);
        m[0] = Operand::Reg(tmp);
        m[1] = Operand::Reg(base);
        m[2] = Operand::Bits(OpBits::B64);
        m[3] = Operand::Imm(offset);
    }
    ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::LoadAddrRegMem;

    let rewritten = ctx.inst(cur.next).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::OpBinaryRegImm;
        ctx.operands.restore(&rewritten, old);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, [base+off]; lea dst, [tmp]` folds into `mov dst, [base+off]`
/// when `tmp` dies there.
pub(super) fn fold_loadregmem_into_next_load_addr_copy(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::LoadAddrRegMem {
        return false;
    }
    let ops = ctx.ops(&inst);
    let next_ops = ctx.ops(&next_inst);
    let tmp = ops[0].reg();
    if next_ops[1].reg() != tmp {
        return false;
    }
    if next_ops[3].imm() != 0 {
        return false;
    }
    if ops[2].bits() != OpBits::B64 || next_ops[2].bits() != OpBits::B64 {
        return false;
    }
    let dst = next_ops[0];
    let (src_base, src_bits, src_off) = (ops[1], ops[2], ops[3]);
    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), tmp) {
        return false;
    }

    let old = ctx.operands.snapshot(&next_inst);
    {
        let m = ctx.operands.block_mut(&next_inst);
        m[0] = dst;
        m[1] = src_base;
        m[2] = src_bits;
        m[3] = src_off;
    }
    ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::LoadRegMem;

    let rewritten = ctx.inst(cur.next).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.insts.get_mut(cur.next).unwrap().opcode = Opcode::LoadAddrRegMem;
        ctx.operands.restore(&rewritten, old);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    true
}

/// `mov tmp, [base+off]; op dst, tmp` becomes `op dst, [base+off]` for the
/// operations with a reg-mem form.
pub(super) fn fold_loadregmem_into_next_binary_regmem(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if next_inst.opcode != Opcode::OpBinaryRegReg {
        return false;
    }
    let ops = ctx.ops(&inst);
    let next_ops = ctx.ops(&next_inst);
    let tmp = ops[0].reg();
    if next_ops[1].reg() != tmp {
        return false;
    }
    if next_ops[0].reg() == tmp {
        return false;
    }
    if ops[2].bits() != next_ops[2].bits() {
        return false;
    }
    match next_ops[3].alu_op() {
        AluOp::Add | AluOp::Sub | AluOp::And | AluOp::Or | AluOp::Xor | AluOp::Smul => {}
        _ => return false,
    }
    if !is_copy_dead_after(ctx, ctx.insts.next(cur.next), tmp) {
        return false;
    }

    let new_ops = [
        next_ops[0],               // dst
        ops[1],                    // base
        next_ops[2],               // bits
        next_ops[3],               // op
        ops[3],                    // off
    ];
    let new_ref = insert_inst_before(
        ctx.insts,
        ctx.operands,
        cur.next,
        Opcode::OpBinaryRegMem,
        &new_ops,
    );
    let new_inst = ctx.inst(new_ref).unwrap();
    if violates_encoder_conformance(ctx.encoder, &new_inst, ctx.operands.slice(&new_inst)) {
        ctx.insts.erase(new_ref);
        return false;
    }

    ctx.insts.erase(cur.inst_ref);
    ctx.insts.erase(cur.next);
    true
}

/// `lea tmp, [base + disp]` whose only user is a later single-base memory
/// access folds into that access by shifting base and offset.
pub(super) fn fold_load_addr_into_next_mem_offset(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let ops = ctx.ops(&inst);
    let tmp = ops[0].reg();
    let base = ops[1].reg();
    let extra = ops[3].imm();

    let mut scan = cur.next;
    while scan.is_valid() {
        let scan_inst = match ctx.inst(scan) {
            Some(inst) => inst,
            None => return false,
        };
        let use_def = ctx.use_def(&scan_inst);
        if use_def.defs.contains(&base) {
            return false;
        }
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

        let (base_slot, off_slot) = match info::mem_base_offset_slots(scan_inst.opcode) {
            Some(slots) => slots,
            None => return false,
        };
        let scan_ops = ctx.ops(&scan_inst);
        if scan_ops[base_slot as usize].reg() != tmp {
            return false;
        }
        if !is_temp_dead_for_address_fold(ctx, ctx.insts.next(scan), tmp) {
            return false;
        }
        let old_off = scan_ops[off_slot as usize].imm();
        let folded = match old_off.checked_add(extra) {
            Some(v) => v,
            None => return false,
        };

        let old = ctx.operands.snapshot(&scan_inst);
        {
            let m = ctx.operands.block_mut(&scan_inst);
            m[base_slot as usize] = Operand::Reg(base);
            m[off_slot as usize] = Operand::Imm(folded);
        }
        if violates_encoder_conformance(ctx.encoder, &scan_inst, ctx.operands.slice(&scan_inst)) {
            ctx.operands.restore(&scan_inst, old);
            return false;
        }

        ctx.insts.erase(cur.inst_ref);
        return true;
    }
    false
}

/// `lea tmp, [base + index*scale + disp]; <access through tmp>` fuses into
/// one scaled-indexed access.
pub(super) fn fold_load_addr_amc_into_next_memory_access(ctx: &mut PassContext, cur: &Cursor) -> bool {
    let inst = ctx.inst(cur.inst_ref).unwrap();
    let ops = ctx.ops(&inst);
    let scale = ops[5].imm();
    if !matches!(scale, 1 | 2 | 4 | 8) {
        return false;
    }
    let tmp = ops[0].reg();
    let next_inst = match ctx.inst(cur.next) {
        Some(inst) => inst,
        None => return false,
    };
    if !is_temp_dead_for_address_fold(ctx, ctx.insts.next(cur.next), tmp) {
        return false;
    }
    let nxt = ctx.operands.snapshot(&next_inst);

    let (new_opcode, next_off) = match next_inst.opcode {
        Opcode::LoadRegMem => {
            if nxt[1].reg() != tmp {
                return false;
            }
            (Opcode::LoadAmcRegMem, nxt[3].imm())
        }
        Opcode::LoadMemReg => {
            if nxt[0].reg() != tmp {
                return false;
            }
            (Opcode::LoadAmcMemReg, nxt[3].imm())
        }
        Opcode::LoadMemImm => {
            if nxt[0].reg() != tmp {
                return false;
            }
            (Opcode::LoadAmcMemImm, nxt[2].imm())
        }
        _ => return false,
    };
    let combined = match ops[6].imm().checked_add(next_off) {
        Some(v) => v,
        None => return false,
    };

    let old = ctx.operands.snapshot(&inst);
    let old_opcode = inst.opcode;
    {
        let base = old[1];
        let index = old[2];
        let amc_bits = old[4];
        let m = ctx.operands.block_mut(&inst);
        match new_opcode {
            Opcode::LoadAmcRegMem => {
                // [dst, base, index, dst_bits, amc_bits, scale, disp]
                m[0] = nxt[0];
                m[1] = base;
                m[2] = index;
                m[3] = Operand::Bits(nxt[2].bits());
                m[4] = amc_bits;
                m[5] = Operand::Imm(scale);
                m[6] = Operand::Imm(combined);
            }
            Opcode::LoadAmcMemReg => {
                // [base, index, src, amc_bits, src_bits, scale, disp]
                m[0] = base;
                m[1] = index;
                m[2] = nxt[1];
                m[3] = amc_bits;
                m[4] = Operand::Bits(nxt[2].bits());
                m[5] = Operand::Imm(scale);
                m[6] = Operand::Imm(combined);
            }
            Opcode::LoadAmcMemImm => {
                // [base, index, amc_bits, val_bits, scale, disp, imm]
                m[0] = base;
                m[1] = index;
                m[2] = amc_bits;
                m[3] = Operand::Bits(nxt[1].bits());
                m[4] = Operand::Imm(scale);
                m[5] = Operand::Imm(combined);
                m[6] = Operand::Imm(nxt[3].imm());
            }
            _ => unreachable!(),
        }
    }
    ctx.insts.get_mut(cur.inst_ref).unwrap().opcode = new_opcode;

    let rewritten = ctx.inst(cur.inst_ref).unwrap();
    if violates_encoder_conformance(ctx.encoder, &rewritten, ctx.operands.slice(&rewritten)) {
        ctx.insts.get_mut(cur.inst_ref).unwrap().opcode = old_opcode;
        ctx.operands.restore(&rewritten, old);
        return false;
    }

    ctx.insts.erase(cur.next);
    true
}
