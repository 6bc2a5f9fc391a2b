//! Branch folding.
//!
//! Evaluates conditional jumps whose compare inputs are compile-time
//! constants. A one-slot compare state is armed by a compare whose inputs
//! are all known, consumed by the next conditional jump, and invalidated
//! by anything else except `Debug` markers.

use crate::error::CodegenResult;
use crate::ir::condcodes::Cond;
use crate::ir::info;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::OpBits;
use crate::passes::folding;
use crate::passes::{Pass, PassContext};
use rustc_hash::FxHashMap;

#[derive(Default)]
struct CompareState {
    valid: bool,
    lhs: u64,
    rhs: u64,
    bits: OpBits,
}

fn evaluate_condition(cond: Cond, lhs: u64, rhs: u64, bits: OpBits) -> Option<bool> {
    let lu = bits.normalize(lhs);
    let ru = bits.normalize(rhs);
    let ls = bits.to_signed(lhs);
    let rs = bits.to_signed(rhs);
    Some(match cond {
        Cond::Unconditional => true,
        Cond::Equal | Cond::Zero => lu == ru,
        Cond::NotEqual | Cond::NotZero => lu != ru,
        Cond::Above => lu > ru,
        Cond::AboveOrEqual => lu >= ru,
        Cond::Below => lu < ru,
        Cond::BelowOrEqual | Cond::NotAbove => lu <= ru,
        Cond::Greater => ls > rs,
        Cond::GreaterOrEqual => ls >= rs,
        Cond::Less => ls < rs,
        Cond::LessOrEqual => ls <= rs,
    })
}

pub struct BranchFolding;

impl Pass for BranchFolding {
    fn name(&self) -> &'static str {
        "branch-folding"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let mut changed = false;
        let mut known: FxHashMap<u32, u64> = FxHashMap::default();
        known.reserve(64);
        let mut compare = CompareState::default();

        let mut r = ctx.insts.first();
        while r.is_valid() {
            let next = ctx.insts.next(r);
            let inst = match ctx.inst(r) {
                Some(inst) => inst,
                None => {
                    r = next;
                    continue;
                }
            };
            let ops = ctx.ops(&inst);

            match inst.opcode {
                Opcode::JumpCond | Opcode::JumpCondImm => {
                    if compare.valid {
                        let cond = ops[0].cond();
                        if let Some(taken) =
                            evaluate_condition(cond, compare.lhs, compare.rhs, compare.bits)
                        {
                            if taken {
                                if cond != Cond::Unconditional {
                                    ctx.operands.slice_mut(&inst)[0] =
                                        Operand::Cond(Cond::Unconditional);
                                    log::trace!("branch-fold: jump made unconditional");
                                    changed = true;
                                }
                            } else {
                                ctx.insts.erase(r);
                                log::trace!("branch-fold: dead jump erased");
                                changed = true;
                                compare.valid = false;
                                r = next;
                                continue;
                            }
                        }
                    }
                    compare.valid = false;
                }
                Opcode::CmpRegImm if ops[0].reg().is_int_class() => {
                    match known.get(&ops[0].reg().packed()) {
                        Some(&value) => {
                            compare.valid = true;
                            compare.lhs = ops[1].bits().normalize(value);
                            compare.rhs = ops[1].bits().normalize(ops[2].imm());
                            compare.bits = ops[1].bits();
                        }
                        None => compare.valid = false,
                    }
                }
                Opcode::CmpRegZero if ops[0].reg().is_int_class() => {
                    match known.get(&ops[0].reg().packed()) {
                        Some(&value) => {
                            compare.valid = true;
                            compare.lhs = ops[1].bits().normalize(value);
                            compare.rhs = 0;
                            compare.bits = ops[1].bits();
                        }
                        None => compare.valid = false,
                    }
                }
                Opcode::CmpRegReg
                    if ops[0].reg().is_int_class() && ops[1].reg().is_int_class() =>
                {
                    let lhs = known.get(&ops[0].reg().packed()).copied();
                    let rhs = known.get(&ops[1].reg().packed()).copied();
                    match (lhs, rhs) {
                        (Some(lhs), Some(rhs)) => {
                            compare.valid = true;
                            compare.lhs = ops[2].bits().normalize(lhs);
                            compare.rhs = ops[2].bits().normalize(rhs);
                            compare.bits = ops[2].bits();
                        }
                        _ => compare.valid = false,
                    }
                }
                Opcode::Debug => {}
                _ => compare.valid = false,
            }

            let inst = ctx.inst(r).unwrap();
            let use_def = ctx.use_def(&inst);
            for def in &use_def.defs {
                known.remove(&def.packed());
            }
            if use_def.is_call {
                known.clear();
                compare.valid = false;
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
                compare.valid = false;
            }
            r = next;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::MicroBuilder;
    use crate::passes::const_prop::ConstantPropagation;
    use crate::passes::tests::run_single_pass;

    #[test]
    fn condition_table() {
        assert_eq!(evaluate_condition(Cond::Equal, 5, 5, OpBits::B32), Some(true));
        assert_eq!(evaluate_condition(Cond::NotEqual, 5, 5, OpBits::B32), Some(false));
        // Unsigned vs signed at width 8: 0xFF is 255 unsigned, -1 signed.
        assert_eq!(evaluate_condition(Cond::Above, 0xFF, 1, OpBits::B8), Some(true));
        assert_eq!(evaluate_condition(Cond::Greater, 0xFF, 1, OpBits::B8), Some(false));
        assert_eq!(evaluate_condition(Cond::Less, 0xFF, 1, OpBits::B8), Some(true));
        // Width masking: 0x100 is zero at 8 bits.
        assert_eq!(evaluate_condition(Cond::Zero, 0x100, 0, OpBits::B8), Some(true));
        assert_eq!(evaluate_condition(Cond::NotAbove, 3, 3, OpBits::B64), Some(true));
    }

    #[test]
    fn true_condition_becomes_unconditional() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let target = b.create_label();
        b.encode_load_reg_imm(v0, 5, OpBits::B32);
        b.encode_cmp_reg_imm(v0, 5, OpBits::B32);
        b.encode_jump_cond(Cond::Zero, target);
        b.bind_label(target);
        b.encode_ret();

        let changed = run_single_pass(&mut b, BranchFolding).unwrap();
        assert!(changed);
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[2].opcode, Opcode::JumpCond);
        assert_eq!(b.operands.slice(&insts[2])[0].cond(), Cond::Unconditional);
        // The mov and cmp survive; a later cleanup may drop them.
        assert_eq!(insts[0].opcode, Opcode::LoadRegImm);
        assert_eq!(insts[1].opcode, Opcode::CmpRegImm);
    }

    #[test]
    fn false_condition_erases_jump() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let target = b.create_label();
        b.encode_load_reg_imm(v0, 4, OpBits::B32);
        b.encode_cmp_reg_imm(v0, 5, OpBits::B32);
        b.encode_jump_cond(Cond::Zero, target);
        b.bind_label(target);
        b.encode_ret();

        let changed = run_single_pass(&mut b, BranchFolding).unwrap();
        assert!(changed);
        let opcodes: Vec<_> = b.insts.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::LoadRegImm, Opcode::CmpRegImm, Opcode::Label, Opcode::Ret]
        );
    }

    #[test]
    fn works_after_constant_propagation() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        let target = b.create_label();
        b.encode_load_reg_imm(v0, 7, OpBits::B64);
        b.encode_load_reg_reg(v1, v0, OpBits::B64);
        b.encode_cmp_reg_reg(v0, v1, OpBits::B64);
        b.encode_jump_cond(Cond::Equal, target);
        b.bind_label(target);
        b.encode_ret();

        run_single_pass(&mut b, ConstantPropagation).unwrap();
        let changed = run_single_pass(&mut b, BranchFolding).unwrap();
        assert!(changed);
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        let jump = insts.iter().find(|i| i.opcode == Opcode::JumpCond).unwrap();
        assert_eq!(b.operands.slice(jump)[0].cond(), Cond::Unconditional);
    }

    #[test]
    fn intervening_instruction_invalidates_compare() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        let v2 = b.alloc_virt_int();
        let target = b.create_label();
        b.encode_load_reg_imm(v0, 5, OpBits::B32);
        b.encode_cmp_reg_imm(v0, 5, OpBits::B32);
        b.encode_load_reg_mem(v1, v2, 0, OpBits::B64);
        b.encode_jump_cond(Cond::Zero, target);
        b.bind_label(target);
        b.encode_ret();

        let changed = run_single_pass(&mut b, BranchFolding).unwrap();
        assert!(!changed);
    }
}
