//! Legalization.
//!
//! Probes every instruction against the encoder and rewrites the ones it
//! refuses into sequences it accepts, driven by the returned hint: operand
//! moves into the architecturally required registers, materialization of
//! oversized immediates into scratch registers, and widening of 8-bit
//! forms that do not exist. A `NotSupported` verdict that no rewrite can
//! service abandons the function.

use crate::abi::CallConv;
use crate::error::{internal_error, CodegenResult};
use crate::ir::info;
use crate::ir::instructions::{Inst, Opcode, Operand};
use crate::ir::ops::OpBits;
use crate::ir::reg::Reg;
use crate::ir::storage::{insert_inst_before, push_inst};
use crate::isa::x64::{regs, EmitFlags, EncodeResult};
use crate::passes::{Pass, PassContext};
use ingot_entity::Ref;
use smallvec::SmallVec;

/// The width that governs an instruction's operation.
fn primary_bits(inst: &Inst, ops: &[Operand]) -> OpBits {
    match inst.opcode {
        Opcode::OpBinaryRegReg
        | Opcode::OpBinaryRegMem
        | Opcode::OpBinaryMemReg
        | Opcode::CmpRegReg
        | Opcode::CmpMemReg => ops[2].bits(),
        Opcode::OpBinaryRegImm
        | Opcode::OpBinaryMemImm
        | Opcode::CmpRegImm
        | Opcode::CmpRegZero
        | Opcode::CmpMemImm
        | Opcode::LoadRegImm
        | Opcode::LoadMemImm => ops[1].bits(),
        Opcode::OpTernaryRegRegReg => ops[4].bits(),
        Opcode::LoadAmcMemImm => ops[3].bits(),
        _ => OpBits::B64,
    }
}

fn regs_of(ops: &[Operand]) -> SmallVec<[Reg; 4]> {
    ops.iter()
        .filter_map(|op| op.as_reg())
        .filter(|r| r.is_valid() && !r.is_no_base())
        .collect()
}

fn insert_after(ctx: &mut PassContext, at: Ref, opcode: Opcode, ops: &[Operand]) {
    let next = ctx.insts.next(at);
    if next.is_valid() {
        insert_inst_before(ctx.insts, ctx.operands, next, opcode, ops);
    } else {
        push_inst(ctx.insts, ctx.operands, opcode, ops);
    }
}

fn pick_int_scratch(ctx: &PassContext, forbidden: &[Reg]) -> CodegenResult<Reg> {
    let conv = CallConv::get(ctx.call_conv);
    match conv.try_pick_int_scratch_regs(forbidden) {
        Some((r0, _)) => Ok(r0),
        None => Err(internal_error(ctx.func_name, "no scratch register available")),
    }
}

fn pick_float_scratch(ctx: &PassContext, forbidden: &[Reg]) -> CodegenResult<Reg> {
    let conv = CallConv::get(ctx.call_conv);
    conv.float_transient_regs
        .iter()
        .copied()
        .find(|r| !forbidden.contains(r))
        .ok_or_else(|| internal_error(ctx.func_name, "no float scratch register available"))
}

/// The immediate operand of an imm-form opcode, with the reg-form opcode
/// it legalizes into.
fn imm_form(opcode: Opcode) -> Option<Opcode> {
    match opcode {
        Opcode::OpBinaryRegImm => Some(Opcode::OpBinaryRegReg),
        Opcode::OpBinaryMemImm => Some(Opcode::OpBinaryMemReg),
        Opcode::CmpRegImm => Some(Opcode::CmpRegReg),
        Opcode::CmpMemImm => Some(Opcode::CmpMemReg),
        Opcode::LoadMemImm => Some(Opcode::LoadMemReg),
        Opcode::LoadAmcMemImm => Some(Opcode::LoadAmcMemReg),
        Opcode::LoadRegImm => Some(Opcode::LoadRegReg),
        _ => None,
    }
}

fn materialize_immediate(ctx: &mut PassContext, r: Ref, inst: &Inst) -> CodegenResult<()> {
    let ops = ctx.operands.snapshot(inst);
    let reg_opcode = match imm_form(inst.opcode) {
        Some(op) => op,
        None => {
            return Err(internal_error(
                ctx.func_name,
                format!("{:?} has no immediate to materialize", inst.opcode),
            ))
        }
    };
    let forbidden = regs_of(ctx.ops(inst));
    let scratch = pick_int_scratch(ctx, &forbidden)?;

    let value = match inst.opcode {
        Opcode::OpBinaryRegImm => ops[3].imm(),
        Opcode::OpBinaryMemImm => ops[4].imm(),
        Opcode::CmpRegImm => ops[2].imm(),
        Opcode::CmpMemImm | Opcode::LoadMemImm => ops[3].imm(),
        Opcode::LoadAmcMemImm => ops[6].imm(),
        Opcode::LoadRegImm => ops[2].imm(),
        _ => unreachable!(),
    };
    insert_inst_before(
        ctx.insts,
        ctx.operands,
        r,
        Opcode::LoadRegImm,
        &[
            Operand::Reg(scratch),
            Operand::Bits(OpBits::B64),
            Operand::Imm(value),
        ],
    );

    let m = ctx.operands.block_mut(inst);
    match inst.opcode {
        Opcode::OpBinaryRegImm => {
            // [dst, bits, op, imm] -> [dst, src, bits, op]
            let (bits, op) = (ops[1], ops[2]);
            m[1] = Operand::Reg(scratch);
            m[2] = bits;
            m[3] = op;
        }
        Opcode::OpBinaryMemImm => {
            // [base, bits, op, off, imm] -> [base, src, bits, op, off]
            let (bits, op, off) = (ops[1], ops[2], ops[3]);
            m[1] = Operand::Reg(scratch);
            m[2] = bits;
            m[3] = op;
            m[4] = off;
        }
        Opcode::CmpRegImm => {
            // [reg, bits, imm] -> [lhs, rhs, bits]
            let bits = ops[1];
            m[1] = Operand::Reg(scratch);
            m[2] = bits;
        }
        Opcode::CmpMemImm | Opcode::LoadMemImm => {
            // [base, bits, off, imm] -> [base, rhs, bits, off]
            let (bits, off) = (ops[1], ops[2]);
            m[1] = Operand::Reg(scratch);
            m[2] = bits;
            m[3] = off;
        }
        Opcode::LoadAmcMemImm => {
            // [base, index, amc_bits, val_bits, scale, disp, imm]
            // -> [base, index, src, amc_bits, src_bits, scale, disp]
            let (amc, val, scale, disp) = (ops[2], ops[3], ops[4], ops[5]);
            m[2] = Operand::Reg(scratch);
            m[3] = amc;
            m[4] = val;
            m[5] = scale;
            m[6] = disp;
        }
        Opcode::LoadRegImm => {
            // Float destination: shuttle the bit pattern through an
            // integer register.
            let bits = ops[1];
            m[1] = Operand::Reg(scratch);
            m[2] = bits;
        }
        _ => unreachable!(),
    }
    let slot = ctx.insts.get_mut(r).unwrap();
    slot.opcode = reg_opcode;
    slot.num_operands = reg_opcode.num_operands() as u8;
    Ok(())
}

pub struct Legalize;

impl Pass for Legalize {
    fn name(&self) -> &'static str {
        "legalize"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let mut changed = false;
        let mut r = ctx.insts.first();
        while r.is_valid() {
            let next = ctx.insts.next(r);

            // An instruction may need several shape changes; each applied
            // hint re-probes. The bound exists only to turn a hint cycle
            // into a hard error.
            for round in 0.. {
                let inst = ctx.inst(r).unwrap();
                let verdict = {
                    let ops = ctx.operands.slice(&inst);
                    ctx.encoder.encode_inst(&inst, ops, EmitFlags::CAN_ENCODE)
                };
                if verdict == EncodeResult::Zero {
                    break;
                }
                if round >= 8 {
                    return Err(internal_error(
                        ctx.func_name,
                        format!("legalization loop on {:?}", inst.opcode),
                    ));
                }
                changed = true;
                log::trace!("legalize: {:?} -> {:?}", inst.opcode, verdict);

                match verdict {
                    EncodeResult::Zero => unreachable!(),
                    EncodeResult::Left2Rax => {
                        let ops = ctx.operands.snapshot(&inst);
                        let left = ops[0].reg();
                        let bits = primary_bits(&inst, &ops[..inst.num_operands as usize]);
                        insert_inst_before(
                            ctx.insts,
                            ctx.operands,
                            r,
                            Opcode::LoadRegReg,
                            &[
                                Operand::Reg(regs::rax()),
                                Operand::Reg(left),
                                Operand::Bits(bits),
                            ],
                        );
                        ctx.operands.slice_mut(&inst)[0] = Operand::Reg(regs::rax());
                        let writes_left = info::reg_operands(&inst)
                            .iter()
                            .any(|ro| ro.slot == 0 && ro.is_def);
                        if writes_left && left != regs::rax() {
                            insert_after(
                                ctx,
                                r,
                                Opcode::LoadRegReg,
                                &[
                                    Operand::Reg(left),
                                    Operand::Reg(regs::rax()),
                                    Operand::Bits(bits),
                                ],
                            );
                        }
                    }
                    EncodeResult::Right2Rcx => {
                        let ops = ctx.operands.snapshot(&inst);
                        let src = ops[1].reg();
                        let bits = primary_bits(&inst, &ops[..inst.num_operands as usize]);
                        insert_inst_before(
                            ctx.insts,
                            ctx.operands,
                            r,
                            Opcode::LoadRegReg,
                            &[
                                Operand::Reg(regs::rcx()),
                                Operand::Reg(src),
                                Operand::Bits(bits),
                            ],
                        );
                        ctx.operands.slice_mut(&inst)[1] = Operand::Reg(regs::rcx());
                    }
                    EncodeResult::Right2Reg | EncodeResult::Right2Cst => {
                        materialize_immediate(ctx, r, &inst)?;
                    }
                    EncodeResult::ForceZero32 => {
                        // 8-bit bit scans and population counts do not
                        // exist; widen through a zero extension.
                        let ops = ctx.operands.snapshot(&inst);
                        debug_assert_eq!(inst.opcode, Opcode::OpBinaryRegReg);
                        let src = ops[1].reg();
                        insert_inst_before(
                            ctx.insts,
                            ctx.operands,
                            r,
                            Opcode::LoadZeroExtRegReg,
                            &[
                                Operand::Reg(src),
                                Operand::Reg(src),
                                Operand::Bits(OpBits::B32),
                                Operand::Bits(OpBits::B8),
                            ],
                        );
                        ctx.operands.slice_mut(&inst)[2] = Operand::Bits(OpBits::B32);
                    }
                    EncodeResult::Left2Reg => {
                        let ops = ctx.operands.snapshot(&inst);
                        match inst.opcode {
                            Opcode::OpBinaryMemReg => {
                                // Pull the memory operand into a register,
                                // operate, and write it back.
                                let (base, src) = (ops[0].reg(), ops[1].reg());
                                let bits = ops[2].bits();
                                let op = ops[3];
                                let off = ops[4].imm();
                                let forbidden = regs_of(&ops[..inst.num_operands as usize]);
                                let scratch = pick_int_scratch(ctx, &forbidden)?;
                                insert_inst_before(
                                    ctx.insts,
                                    ctx.operands,
                                    r,
                                    Opcode::LoadRegMem,
                                    &[
                                        Operand::Reg(scratch),
                                        Operand::Reg(base),
                                        Operand::Bits(bits),
                                        Operand::Imm(off),
                                    ],
                                );
                                insert_after(
                                    ctx,
                                    r,
                                    Opcode::LoadMemReg,
                                    &[
                                        Operand::Reg(base),
                                        Operand::Reg(scratch),
                                        Operand::Bits(bits),
                                        Operand::Imm(off),
                                    ],
                                );
                                let m = ctx.operands.block_mut(&inst);
                                m[0] = Operand::Reg(scratch);
                                m[1] = Operand::Reg(src);
                                m[2] = Operand::Bits(bits);
                                m[3] = op;
                                let slot = ctx.insts.get_mut(r).unwrap();
                                slot.opcode = Opcode::OpBinaryRegReg;
                                slot.num_operands = 4;
                            }
                            Opcode::CmpMemReg => {
                                // Float comparison against memory: load
                                // the memory side into a float scratch.
                                let base = ops[0].reg();
                                let rhs = ops[1].reg();
                                let bits = ops[2].bits();
                                let off = ops[3].imm();
                                let forbidden = regs_of(&ops[..inst.num_operands as usize]);
                                let scratch = pick_float_scratch(ctx, &forbidden)?;
                                insert_inst_before(
                                    ctx.insts,
                                    ctx.operands,
                                    r,
                                    Opcode::LoadRegMem,
                                    &[
                                        Operand::Reg(scratch),
                                        Operand::Reg(base),
                                        Operand::Bits(bits),
                                        Operand::Imm(off),
                                    ],
                                );
                                let m = ctx.operands.block_mut(&inst);
                                m[0] = Operand::Reg(scratch);
                                m[1] = Operand::Reg(rhs);
                                m[2] = Operand::Bits(bits);
                                let slot = ctx.insts.get_mut(r).unwrap();
                                slot.opcode = Opcode::CmpRegReg;
                                slot.num_operands = 3;
                            }
                            other => {
                                return Err(internal_error(
                                    ctx.func_name,
                                    format!("Left2Reg hint on {other:?}"),
                                ))
                            }
                        }
                    }
                    EncodeResult::NotSupported => {
                        return Err(internal_error(
                            ctx.func_name,
                            format!("{:?} is not encodable", inst.opcode),
                        ));
                    }
                }
            }
            r = next;
        }

        // Everything left must now probe clean.
        let mut r = ctx.insts.first();
        while r.is_valid() {
            let inst = ctx.inst(r).unwrap();
            let verdict = {
                let ops = ctx.operands.slice(&inst);
                ctx.encoder.encode_inst(&inst, ops, EmitFlags::CAN_ENCODE)
            };
            debug_assert_eq!(verdict, EncodeResult::Zero, "{:?}", inst.opcode);
            r = ctx.insts.next(r);
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::AluOp;
    use crate::ir::MicroBuilder;
    use crate::passes::tests::run_single_pass;

    fn opcode_list(b: &MicroBuilder) -> Vec<Opcode> {
        b.insts.iter().map(|(_, i)| i.opcode).collect()
    }

    #[test]
    fn division_moves_dividend_to_rax() {
        let mut b = MicroBuilder::new();
        b.encode_op_binary_reg_reg(regs::rbx(), regs::rsi(), AluOp::Udiv, OpBits::B64);
        b.encode_ret();

        assert!(run_single_pass(&mut b, Legalize).unwrap());
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        // mov rax, rbx; div; mov rbx, rax; ret
        assert_eq!(
            opcode_list(&b),
            vec![
                Opcode::LoadRegReg,
                Opcode::OpBinaryRegReg,
                Opcode::LoadRegReg,
                Opcode::Ret
            ]
        );
        assert_eq!(b.operands.slice(&insts[0])[0].reg(), regs::rax());
        assert_eq!(b.operands.slice(&insts[1])[0].reg(), regs::rax());
        assert_eq!(b.operands.slice(&insts[2])[0].reg(), regs::rbx());
    }

    #[test]
    fn shift_count_moves_to_rcx() {
        let mut b = MicroBuilder::new();
        b.encode_op_binary_reg_reg(regs::rax(), regs::rbx(), AluOp::Shl, OpBits::B64);
        b.encode_ret();

        run_single_pass(&mut b, Legalize).unwrap();
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[0].opcode, Opcode::LoadRegReg);
        assert_eq!(b.operands.slice(&insts[0])[0].reg(), regs::rcx());
        assert_eq!(b.operands.slice(&insts[1])[1].reg(), regs::rcx());
    }

    #[test]
    fn oversized_immediate_is_materialized() {
        let mut b = MicroBuilder::new();
        b.encode_op_binary_reg_imm(regs::rax(), 0x1_0000_0000, AluOp::Add, OpBits::B64);
        b.encode_ret();

        run_single_pass(&mut b, Legalize).unwrap();
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[0].opcode, Opcode::LoadRegImm);
        assert_eq!(b.operands.slice(&insts[0])[2].imm(), 0x1_0000_0000);
        assert_eq!(insts[1].opcode, Opcode::OpBinaryRegReg);
        // The scratch register feeds the add.
        assert_eq!(
            b.operands.slice(&insts[1])[1].reg(),
            b.operands.slice(&insts[0])[0].reg()
        );
    }

    #[test]
    fn eight_bit_popcnt_widens() {
        let mut b = MicroBuilder::new();
        b.encode_op_binary_reg_reg(regs::rax(), regs::rbx(), AluOp::Popcnt, OpBits::B8);
        b.encode_ret();

        run_single_pass(&mut b, Legalize).unwrap();
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[0].opcode, Opcode::LoadZeroExtRegReg);
        assert_eq!(b.operands.slice(&insts[1])[2].bits(), OpBits::B32);
    }

    #[test]
    fn legal_instructions_are_untouched() {
        let mut b = MicroBuilder::new();
        b.encode_op_binary_reg_reg(regs::rax(), regs::rbx(), AluOp::Add, OpBits::B64);
        b.encode_cmp_reg_imm(regs::rax(), 5, OpBits::B32);
        b.encode_ret();

        let changed = run_single_pass(&mut b, Legalize).unwrap();
        assert!(!changed);
        assert_eq!(b.insts.len(), 3);
    }

    #[test]
    fn rdx_divisor_is_rejected() {
        let mut b = MicroBuilder::new();
        b.encode_op_binary_reg_reg(regs::rax(), regs::rdx(), AluOp::Udiv, OpBits::B64);
        b.encode_ret();
        assert!(run_single_pass(&mut b, Legalize).is_err());
    }
}
