//! Load/store forwarding.
//!
//! A store immediately followed by a load from the same address collapses
//! into a direct register move (or immediate load). Only exact
//! base-register and displacement identity is considered, and only
//! adjacent pairs; anything in between defeats the match.

use crate::error::CodegenResult;
use crate::ir::instructions::{Opcode, Operand};
use crate::passes::{Pass, PassContext};

pub struct LoadStoreForwarding;

impl Pass for LoadStoreForwarding {
    fn name(&self) -> &'static str {
        "load-store-forwarding"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let mut changed = false;
        let mut r = ctx.insts.first();
        while r.is_valid() {
            let next = ctx.insts.next(r);
            if !next.is_valid() {
                break;
            }
            let first = match ctx.inst(r) {
                Some(inst) => inst,
                None => {
                    r = next;
                    continue;
                }
            };
            let second = ctx.inst(next).unwrap();
            if second.opcode != Opcode::LoadRegMem {
                r = next;
                continue;
            }

            match first.opcode {
                Opcode::LoadMemReg => {
                    // store [base+off], src ; load dst, [base+off]
                    let f = ctx.ops(&first);
                    let s = ctx.ops(&second);
                    let same = f[0].reg() == s[1].reg()
                        && f[3].imm() == s[3].imm()
                        && f[2].bits() == s[2].bits();
                    if same {
                        let src = f[1].reg();
                        let bits = f[2].bits();
                        let m = ctx.operands.slice_mut(&second);
                        m[1] = Operand::Reg(src);
                        m[2] = Operand::Bits(bits);
                        let slot = ctx.insts.get_mut(next).unwrap();
                        slot.opcode = Opcode::LoadRegReg;
                        slot.num_operands = 3;
                        log::trace!("store-forward: load rewritten to register move");
                        changed = true;
                    }
                }
                Opcode::LoadMemImm => {
                    // store [base+off], imm ; load dst, [base+off]
                    let f = ctx.ops(&first);
                    let s = ctx.ops(&second);
                    let same = f[0].reg() == s[1].reg()
                        && f[2].imm() == s[3].imm()
                        && f[1].bits() == s[2].bits();
                    if same {
                        let bits = f[1].bits();
                        let value = f[3].imm();
                        let m = ctx.operands.slice_mut(&second);
                        m[1] = Operand::Bits(bits);
                        m[2] = Operand::Imm(value);
                        let slot = ctx.insts.get_mut(next).unwrap();
                        slot.opcode = Opcode::LoadRegImm;
                        slot.num_operands = 3;
                        log::trace!("store-forward: load rewritten to immediate");
                        changed = true;
                    }
                }
                _ => {}
            }
            r = next;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::OpBits;
    use crate::ir::MicroBuilder;
    use crate::isa::x64::regs;
    use crate::passes::tests::run_single_pass;

    #[test]
    fn store_then_load_becomes_move() {
        let mut b = MicroBuilder::new();
        b.encode_load_mem_reg(regs::rbp(), 8, regs::rax(), OpBits::B64);
        b.encode_load_reg_mem(regs::rbx(), regs::rbp(), 8, OpBits::B64);
        b.encode_ret();

        let changed = run_single_pass(&mut b, LoadStoreForwarding).unwrap();
        assert!(changed);
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[0].opcode, Opcode::LoadMemReg);
        assert_eq!(insts[1].opcode, Opcode::LoadRegReg);
        let ops = b.operands.slice(&insts[1]);
        assert_eq!(ops[0].reg(), regs::rbx());
        assert_eq!(ops[1].reg(), regs::rax());
    }

    #[test]
    fn immediate_store_forwards_value() {
        let mut b = MicroBuilder::new();
        b.encode_load_mem_imm(regs::rbp(), 8, 5, OpBits::B32);
        b.encode_load_reg_mem(regs::rbx(), regs::rbp(), 8, OpBits::B32);
        b.encode_ret();

        run_single_pass(&mut b, LoadStoreForwarding).unwrap();
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert_eq!(insts[1].opcode, Opcode::LoadRegImm);
        assert_eq!(b.operands.slice(&insts[1])[2].imm(), 5);
    }

    #[test]
    fn different_offset_or_width_defeats_the_match() {
        let mut b = MicroBuilder::new();
        b.encode_load_mem_reg(regs::rbp(), 8, regs::rax(), OpBits::B64);
        b.encode_load_reg_mem(regs::rbx(), regs::rbp(), 16, OpBits::B64);
        b.encode_load_mem_reg(regs::rbp(), 24, regs::rax(), OpBits::B64);
        b.encode_load_reg_mem(regs::rbx(), regs::rbp(), 24, OpBits::B32);
        b.encode_ret();

        let changed = run_single_pass(&mut b, LoadStoreForwarding).unwrap();
        assert!(!changed);
    }

    #[test]
    fn intervening_instruction_defeats_the_match() {
        let mut b = MicroBuilder::new();
        b.encode_load_mem_reg(regs::rbp(), 8, regs::rax(), OpBits::B64);
        b.encode_nop();
        b.encode_load_reg_mem(regs::rbx(), regs::rbp(), 8, OpBits::B64);
        b.encode_ret();

        let changed = run_single_pass(&mut b, LoadStoreForwarding).unwrap();
        assert!(!changed);
    }
}
