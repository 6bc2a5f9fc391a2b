//! Prolog and epilog insertion.
//!
//! Saves the persistent registers the body touches, reserves shadow space
//! and spill slots, keeps the stack aligned, and mirrors the teardown at
//! every return. On entry the stack pointer is misaligned by one slot
//! (the pushed return address); the reserved frame is sized so the body
//! runs with a fully aligned stack.

use crate::abi::CallConv;
use crate::error::CodegenResult;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::ir::storage::insert_inst_before;
use crate::passes::{Pass, PassContext};
use ingot_entity::Ref;

pub struct PrologEpilog;

impl Pass for PrologEpilog {
    fn name(&self) -> &'static str {
        "prolog-epilog"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let conv = CallConv::get(ctx.call_conv);
        let saved: Vec<_> = if ctx.preserve_persistent_regs {
            ctx.frame.used_persistent.iter().copied().collect()
        } else {
            Vec::new()
        };

        let slot = conv.stack_slot_size();
        let raw = conv.stack_shadow_space + ctx.frame.spill_slots * slot;
        // Return address plus pushes, then the frame: the total must
        // restore stack alignment.
        let align = conv.stack_alignment;
        let pushed = slot + saved.len() as u32 * slot;
        let mut frame_size = raw.next_multiple_of(align);
        if (pushed + frame_size) % align != 0 {
            frame_size += slot;
        }
        ctx.frame.frame_size = frame_size;

        let first = ctx.insts.first();
        if !first.is_valid() {
            return Ok(false);
        }

        // Entry sequence.
        for &reg in &saved {
            insert_inst_before(ctx.insts, ctx.operands, first, Opcode::Push, &[Operand::Reg(reg)]);
        }
        if frame_size > 0 {
            insert_inst_before(
                ctx.insts,
                ctx.operands,
                first,
                Opcode::OpBinaryRegImm,
                &[
                    Operand::Reg(conv.stack_pointer),
                    Operand::Bits(OpBits::B64),
                    Operand::Op(AluOp::Sub),
                    Operand::Imm(frame_size as u64),
                ],
            );
        }

        // Symmetric teardown before every return.
        let rets: Vec<Ref> = ctx
            .insts
            .iter()
            .filter(|(_, inst)| inst.opcode == Opcode::Ret)
            .map(|(r, _)| r)
            .collect();
        for ret in rets {
            if frame_size > 0 {
                insert_inst_before(
                    ctx.insts,
                    ctx.operands,
                    ret,
                    Opcode::OpBinaryRegImm,
                    &[
                        Operand::Reg(conv.stack_pointer),
                        Operand::Bits(OpBits::B64),
                        Operand::Op(AluOp::Add),
                        Operand::Imm(frame_size as u64),
                    ],
                );
            }
            for &reg in saved.iter().rev() {
                insert_inst_before(ctx.insts, ctx.operands, ret, Opcode::Pop, &[Operand::Reg(reg)]);
            }
        }

        Ok(!saved.is_empty() || frame_size > 0)
    }
}
