//! Constant propagation.
//!
//! Tracks, at block granularity, which integer registers are known to hold
//! a specific constant, and rewrites register moves and foldable
//! immediate arithmetic into plain immediate loads. Labels, calls, and
//! terminators clear all knowledge, so no control-flow graph is needed.

use crate::error::CodegenResult;
use crate::ir::info;
use crate::ir::instructions::{Opcode, Operand};
use crate::passes::folding;
use crate::passes::{Pass, PassContext};
use rustc_hash::FxHashMap;

pub struct ConstantPropagation;

impl Pass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let mut changed = false;
        let mut known: FxHashMap<u32, u64> = FxHashMap::default();
        known.reserve(64);

        let mut r = ctx.insts.first();
        while r.is_valid() {
            let next = ctx.insts.next(r);
            let mut inst = match ctx.inst(r) {
                Some(inst) => inst,
                None => {
                    r = next;
                    continue;
                }
            };

            // Rewrites against current knowledge.
            match inst.opcode {
                Opcode::LoadRegReg => {
                    let ops = ctx.ops(&inst);
                    let dst = ops[0].reg();
                    let src = ops[1].reg();
                    let bits = ops[2].bits();
                    if dst.is_int_class() {
                        if let Some(&value) = known.get(&src.packed()) {
                            let m = ctx.operands.slice_mut(&inst);
                            m[1] = Operand::Bits(bits);
                            m[2] = Operand::Imm(bits.normalize(value));
                            ctx.insts.get_mut(r).unwrap().opcode = Opcode::LoadRegImm;
                            log::trace!("const-prop: copy of known {src:?} -> load imm");
                            changed = true;
                        }
                    }
                }
                Opcode::OpBinaryRegImm => {
                    let ops = ctx.ops(&inst);
                    let dst = ops[0].reg();
                    let bits = ops[1].bits();
                    let op = ops[2].alu_op();
                    let imm = ops[3].imm();
                    if dst.is_int_class() {
                        if let Some(&value) = known.get(&dst.packed()) {
                            if let Some(folded) = folding::fold_binary_immediate(value, imm, op, bits)
                            {
                                let m = ctx.operands.slice_mut(&inst);
                                m[2] = Operand::Imm(folded);
                                let slot = ctx.insts.get_mut(r).unwrap();
                                slot.opcode = Opcode::LoadRegImm;
                                slot.num_operands = 3;
                                log::trace!("const-prop: folded {op:?} on known {dst:?}");
                                changed = true;
                            }
                        }
                    }
                }
                _ => {}
            }

            // Re-read: the rewrite may have changed the opcode.
            inst = ctx.inst(r).unwrap();
            let use_def = ctx.use_def(&inst);
            for def in &use_def.defs {
                known.remove(&def.packed());
            }
            if use_def.is_call {
                known.clear();
                r = next;
                continue;
            }

            let ops = ctx.ops(&inst);
            match inst.opcode {
                Opcode::LoadRegImm if ops[0].reg().is_int_class() => {
                    known.insert(ops[0].reg().packed(), ops[1].bits().normalize(ops[2].imm()));
                }
                Opcode::ClearReg if ops[0].reg().is_int_class() => {
                    known.insert(ops[0].reg().packed(), 0);
                }
                Opcode::LoadRegReg
                    if ops[0].reg().is_int_class() && ops[1].reg().is_int_class() =>
                {
                    if let Some(&value) = known.get(&ops[1].reg().packed()) {
                        known.insert(ops[0].reg().packed(), ops[2].bits().normalize(value));
                    }
                }
                Opcode::OpBinaryRegImm if ops[0].reg().is_int_class() => {
                    if let Some(&value) = known.get(&ops[0].reg().packed()) {
                        if let Some(folded) = folding::fold_binary_immediate(
                            value,
                            ops[3].imm(),
                            ops[2].alu_op(),
                            ops[1].bits(),
                        ) {
                            known.insert(ops[0].reg().packed(), folded);
                        }
                    }
                }
                _ => {}
            }

            if inst.opcode == Opcode::Label || info::is_terminator(&inst) {
                known.clear();
            }
            r = next;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::{AluOp, OpBits};
    use crate::ir::MicroBuilder;
    use crate::passes::tests::run_single_pass;

    #[test]
    fn copy_of_known_constant_becomes_immediate() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 5, OpBits::B32);
        b.encode_load_reg_reg(v1, v0, OpBits::B32);
        b.encode_ret();

        let changed = run_single_pass(&mut b, ConstantPropagation).unwrap();
        assert!(changed);
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[1].opcode, Opcode::LoadRegImm);
        assert_eq!(b.operands.slice(&insts[1])[2].imm(), 5);
    }

    #[test]
    fn arithmetic_on_known_value_folds() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 5, OpBits::B32);
        b.encode_op_binary_reg_imm(v0, 2, AluOp::Shl, OpBits::B32);
        b.encode_ret();

        run_single_pass(&mut b, ConstantPropagation).unwrap();
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[1].opcode, Opcode::LoadRegImm);
        assert_eq!(b.operands.slice(&insts[1])[2].imm(), 20);
    }

    #[test]
    fn calls_and_labels_clear_knowledge() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 5, OpBits::B64);
        b.encode_call_extern("clobber");
        b.encode_load_reg_reg(v1, v0, OpBits::B64);
        b.encode_ret();

        let changed = run_single_pass(&mut b, ConstantPropagation).unwrap();
        assert!(!changed);
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[2].opcode, Opcode::LoadRegReg);
    }

    #[test]
    fn redefinition_kills_knowledge() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        let v2 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 5, OpBits::B64);
        b.encode_load_reg_mem(v0, v2, 0, OpBits::B64);
        b.encode_load_reg_reg(v1, v0, OpBits::B64);
        b.encode_ret();

        let changed = run_single_pass(&mut b, ConstantPropagation).unwrap();
        assert!(!changed);
    }
}
