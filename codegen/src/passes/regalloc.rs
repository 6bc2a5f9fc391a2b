//! Register allocation.
//!
//! A greedy linear allocator over the whole function body. Virtual
//! registers get a free physical register of their class at their first
//! definition and release it after their last use; values that live across
//! a call are placed in persistent (callee-save) registers. When a class
//! runs out of registers the value lives in a frame slot and is shuttled
//! through reserved scratch registers at each use.
//!
//! After this pass no operand references a virtual register, and every
//! persistent register the body touches is reported to the prolog/epilog
//! pass through the frame info.

use crate::abi::CallConv;
use crate::error::{internal_error, CodegenResult};
use crate::ir::info;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::OpBits;
use crate::ir::reg::{Reg, RegClass};
use crate::ir::storage::insert_inst_before;
use crate::passes::{Pass, PassContext};
use ingot_entity::Ref;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

struct LiveRange {
    first: u32,
    last: u32,
    crosses_call: bool,
}

/// Where a virtual register lives after assignment.
#[derive(Clone, Copy, Debug)]
enum Home {
    Reg(Reg),
    /// A frame slot index; the byte offset is shadow-space + slot * 8.
    Slot(u32),
}

pub struct RegisterAllocation;

impl Pass for RegisterAllocation {
    fn name(&self) -> &'static str {
        "register-allocation"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let conv = CallConv::get(ctx.call_conv);

        // Order the body and compute per-virtual live ranges plus the set
        // of physical registers the builder already pinned.
        let order: Vec<Ref> = ctx.insts.iter().map(|(r, _)| r).collect();
        let mut ranges: FxHashMap<u32, LiveRange> = FxHashMap::default();
        let mut pinned: FxHashSet<Reg> = FxHashSet::default();
        let mut call_sites: Vec<u32> = Vec::new();

        for (index, &r) in order.iter().enumerate() {
            let index = index as u32;
            let inst = ctx.inst(r).unwrap();
            let use_def = ctx.use_def(&inst);
            if use_def.is_call {
                call_sites.push(index);
            }
            for reg in use_def.uses.iter().chain(use_def.defs.iter()) {
                if reg.is_virtual() {
                    let range = ranges.entry(reg.packed()).or_insert(LiveRange {
                        first: index,
                        last: index,
                        crosses_call: false,
                    });
                    range.last = index;
                } else if reg.is_valid() && !reg.is_no_base() {
                    pinned.insert(*reg);
                }
            }
        }
        for range in ranges.values_mut() {
            range.crosses_call = call_sites
                .iter()
                .any(|&c| c > range.first && c < range.last);
        }

        if ranges.is_empty() {
            return Ok(false);
        }

        // Allocatable pools, transient first. The stack and frame pointers
        // and anything the builder pinned stay out; the tail of the int
        // pool is held back as spill scratch registers.
        let mut free_int: Vec<Reg> = conv
            .int_transient_regs
            .iter()
            .chain(conv.int_persistent_regs.iter())
            .copied()
            .filter(|r| {
                *r != conv.stack_pointer && *r != conv.frame_pointer && !pinned.contains(r)
            })
            .collect();
        let scratch1 = free_int.pop();
        let scratch0 = free_int.pop();
        let mut free_float: Vec<Reg> = conv
            .float_transient_regs
            .iter()
            .chain(conv.float_persistent_regs.iter())
            .copied()
            .filter(|r| !pinned.contains(r))
            .collect();

        let mut homes: FxHashMap<u32, Home> = FxHashMap::default();
        let mut active: Vec<(u32, Reg)> = Vec::new();
        let mut spill_slots = 0u32;
        let shadow = conv.stack_shadow_space as u64;

        let persistent = |reg: Reg| -> bool {
            conv.is_int_persistent_reg(reg) || conv.is_float_persistent_reg(reg)
        };

        let mut note_persistent = |ctx: &mut PassContext, reg: Reg| {
            if persistent(reg) && !ctx.frame.used_persistent.contains(&reg) {
                ctx.frame.used_persistent.push(reg);
            }
        };

        for (index, &r) in order.iter().enumerate() {
            let index = index as u32;
            let inst = match ctx.inst(r) {
                Some(inst) => inst,
                None => continue,
            };
            let reg_ops = info::reg_operands(&inst);

            // Assign homes to operands, materializing spilled values.
            let mut scratch_in_use: SmallVec<[(Reg, u32, bool); 2]> = SmallVec::new();
            for ro in &reg_ops {
                let slot = ro.slot as usize;
                let reg = ctx.ops(&inst)[slot].reg();
                if !reg.is_virtual() {
                    continue;
                }
                let range = &ranges[&reg.packed()];
                let home = match homes.get(&reg.packed()).copied() {
                    Some(home) => home,
                    None => {
                        // First touch: allocate. Call-crossing values only
                        // accept a callee-save home; everything else takes
                        // the first free register of its class.
                        let free = if reg.class() == RegClass::VirtInt {
                            &mut free_int
                        } else {
                            &mut free_float
                        };
                        let pos = if range.crosses_call {
                            free.iter().position(|r| persistent(*r))
                        } else {
                            (!free.is_empty()).then_some(0)
                        };
                        let home = match pos {
                            Some(pos) => {
                                let phys = free.remove(pos);
                                active.push((reg.packed(), phys));
                                Home::Reg(phys)
                            }
                            None => {
                                let slot_index = spill_slots;
                                spill_slots += 1;
                                Home::Slot(slot_index)
                            }
                        };
                        if let Home::Reg(phys) = home {
                            note_persistent(ctx, phys);
                        }
                        homes.insert(reg.packed(), home);
                        home
                    }
                };

                match home {
                    Home::Reg(phys) => {
                        ctx.operands.slice_mut(&inst)[slot] = Operand::Reg(phys);
                    }
                    Home::Slot(slot_index) => {
                        // Shuttle through a scratch register.
                        let scratch = match scratch_in_use.len() {
                            0 => scratch0,
                            1 => scratch1,
                            _ => None,
                        };
                        let scratch = match scratch {
                            Some(s) => s,
                            None => {
                                return Err(internal_error(
                                    ctx.func_name,
                                    "out of spill scratch registers",
                                ))
                            }
                        };
                        if reg.class() == RegClass::VirtFloat {
                            return Err(internal_error(
                                ctx.func_name,
                                "cannot shuttle a float value through an integer scratch",
                            ));
                        }
                        let offset = shadow + slot_index as u64 * 8;
                        if ro.is_use {
                            insert_inst_before(
                                ctx.insts,
                                ctx.operands,
                                r,
                                Opcode::LoadRegMem,
                                &[
                                    Operand::Reg(scratch),
                                    Operand::Reg(conv.stack_pointer),
                                    Operand::Bits(OpBits::B64),
                                    Operand::Imm(offset),
                                ],
                            );
                        }
                        ctx.operands.slice_mut(&inst)[slot] = Operand::Reg(scratch);
                        scratch_in_use.push((scratch, slot_index, ro.is_def));
                    }
                }
            }

            // Store spilled definitions back to their slots.
            for (scratch, slot_index, is_def) in scratch_in_use {
                if !is_def {
                    continue;
                }
                let offset = shadow + slot_index as u64 * 8;
                let store_ops = [
                    Operand::Reg(conv.stack_pointer),
                    Operand::Reg(scratch),
                    Operand::Bits(OpBits::B64),
                    Operand::Imm(offset),
                ];
                let next = ctx.insts.next(r);
                if next.is_valid() {
                    insert_inst_before(ctx.insts, ctx.operands, next, Opcode::LoadMemReg, &store_ops);
                } else {
                    crate::ir::storage::push_inst(
                        ctx.insts,
                        ctx.operands,
                        Opcode::LoadMemReg,
                        &store_ops,
                    );
                }
            }

            // Release registers whose range ends here.
            active.retain(|(packed, phys)| {
                if ranges[packed].last <= index {
                    if phys.is_float() {
                        free_float.push(*phys);
                    } else {
                        free_int.push(*phys);
                    }
                    false
                } else {
                    true
                }
            });
        }

        ctx.frame.spill_slots = spill_slots;
        if spill_slots > 0 {
            // The spill shuttles write the scratch registers; report them
            // when they come from the callee-save file.
            for scratch in [scratch0, scratch1].into_iter().flatten() {
                if persistent(scratch) && !ctx.frame.used_persistent.contains(&scratch) {
                    ctx.frame.used_persistent.push(scratch);
                }
            }
        }

        // No virtual register may survive.
        let mut r = ctx.insts.first();
        while r.is_valid() {
            let inst = ctx.inst(r).unwrap();
            for op in ctx.ops(&inst) {
                if let Some(reg) = op.as_reg() {
                    if reg.is_virtual() {
                        return Err(crate::error::CodegenError::Verifier(format!(
                            "virtual register {reg:?} survived allocation"
                        )));
                    }
                }
            }
            r = ctx.insts.next(r);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::AluOp;
    use crate::ir::MicroBuilder;
    use crate::passes::tests::run_single_pass_full;

    fn no_virtuals(b: &MicroBuilder) -> bool {
        b.insts.iter().all(|(_, inst)| {
            b.operands
                .slice(inst)
                .iter()
                .all(|op| op.as_reg().map_or(true, |r| !r.is_virtual()))
        })
    }

    #[test]
    fn virtuals_get_physical_homes() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 1, OpBits::B64);
        b.encode_load_reg_imm(v1, 2, OpBits::B64);
        b.encode_op_binary_reg_reg(v0, v1, AluOp::Add, OpBits::B64);
        b.encode_ret();

        let (changed, _) = run_single_pass_full(&mut b, RegisterAllocation).unwrap();
        assert!(changed);
        assert!(no_virtuals(&b));
    }

    #[test]
    fn distinct_live_ranges_get_distinct_registers() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 1, OpBits::B64);
        b.encode_load_reg_imm(v1, 2, OpBits::B64);
        b.encode_op_binary_reg_reg(v1, v0, AluOp::Sub, OpBits::B64);
        b.encode_ret();

        run_single_pass_full(&mut b, RegisterAllocation).unwrap();
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        let r0 = b.operands.slice(&insts[0])[0].reg();
        let r1 = b.operands.slice(&insts[1])[0].reg();
        assert_ne!(r0, r1);
        let sub = b.operands.slice(&insts[2]);
        assert_eq!(sub[0].reg(), r1);
        assert_eq!(sub[1].reg(), r0);
    }

    #[test]
    fn call_crossing_value_reports_persistent_register() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 7, OpBits::B64);
        b.encode_call_extern("other");
        b.encode_op_binary_reg_imm(v0, 1, AluOp::Add, OpBits::B64);
        b.encode_ret();

        let (_, frame) = run_single_pass_full(&mut b, RegisterAllocation).unwrap();
        assert!(no_virtuals(&b));
        assert!(
            !frame.used_persistent.is_empty(),
            "a call-crossing value must land in a callee-save register"
        );
    }

    #[test]
    fn float_virtuals_use_float_registers() {
        let mut b = MicroBuilder::new();
        let f0 = b.alloc_virt_float();
        let f1 = b.alloc_virt_float();
        b.encode_load_reg_reg(f0, crate::isa::x64::regs::xmm(0), OpBits::B64);
        b.encode_load_reg_reg(f1, f0, OpBits::B64);
        b.encode_op_binary_reg_reg(f1, f0, AluOp::Fadd, OpBits::B64);
        b.encode_ret();

        run_single_pass_full(&mut b, RegisterAllocation).unwrap();
        assert!(no_virtuals(&b));
        let insts: Vec<_> = b.insts.iter().map(|(_, i)| *i).collect();
        assert!(b.operands.slice(&insts[1])[0].reg().is_float());
    }

    #[test]
    fn register_pressure_spills_to_frame_slots() {
        let mut b = MicroBuilder::new();
        // More simultaneously live values than the integer file can hold.
        let vs: Vec<_> = (0..16).map(|_| b.alloc_virt_int()).collect();
        for (i, &v) in vs.iter().enumerate() {
            b.encode_load_reg_imm(v, i as u64, OpBits::B64);
        }
        // Keep them all alive to the end.
        for &v in &vs {
            b.encode_op_binary_reg_imm(v, 1, AluOp::Add, OpBits::B64);
        }
        b.encode_ret();

        let (_, frame) = run_single_pass_full(&mut b, RegisterAllocation).unwrap();
        assert!(no_virtuals(&b));
        assert!(frame.spill_slots > 0);
    }
}
