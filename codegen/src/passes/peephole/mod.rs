//! The peephole pass: a first-match rule engine over local instruction
//! windows.
//!
//! Rules are tried in list order against every instruction; the first rule
//! that applies wins and the cursor advances to the next surviving
//! instruction (or restarts from the beginning when that instruction was
//! itself erased by the rule). Every successful rule either erases an
//! instruction or rewrites one into a strictly more canonical form, so the
//! pass terminates without cycle detection.
//!
//! Every rewrite snapshots the operands it is about to mutate, applies the
//! change, probes the encoder, and restores the snapshot when the probe
//! refuses the new shape.

mod addressing;
mod cleanup;
mod copy;
mod immediate;

use crate::error::CodegenResult;
use crate::ir::info;
use crate::ir::instructions::Opcode;
use crate::ir::reg::Reg;
use crate::passes::{Pass, PassContext};
use ingot_entity::Ref;

/// The window a rule sees: the current instruction and the iterator
/// position just after it.
pub(crate) struct Cursor {
    pub inst_ref: Ref,
    pub next: Ref,
}

pub(crate) enum RuleTarget {
    Any,
    Op(Opcode),
}

pub(crate) type RuleApplyFn = fn(&mut PassContext, &Cursor) -> bool;

pub(crate) struct Rule {
    pub name: &'static str,
    pub target: RuleTarget,
    pub apply: RuleApplyFn,
}

fn rules() -> &'static [Rule] {
    static RULES: &[Rule] = &[
        // Addressing.
        Rule {
            name: "fold_zero_index_amc_from_immediate",
            target: RuleTarget::Op(Opcode::LoadRegImm),
            apply: addressing::fold_zero_index_amc_from_immediate,
        },
        Rule {
            name: "fold_copy_add_into_load_address",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: addressing::fold_copy_add_into_load_address,
        },
        Rule {
            name: "fold_load_addr_into_next_mem_offset",
            target: RuleTarget::Op(Opcode::LoadAddrRegMem),
            apply: addressing::fold_load_addr_into_next_mem_offset,
        },
        Rule {
            name: "fold_loadregmem_into_next_load_addr_copy",
            target: RuleTarget::Op(Opcode::LoadRegMem),
            apply: addressing::fold_loadregmem_into_next_load_addr_copy,
        },
        Rule {
            name: "fold_loadregmem_into_next_binary_regmem",
            target: RuleTarget::Op(Opcode::LoadRegMem),
            apply: addressing::fold_loadregmem_into_next_binary_regmem,
        },
        Rule {
            name: "fold_load_addr_amc_into_next_memory_access",
            target: RuleTarget::Op(Opcode::LoadAddrAmcRegMem),
            apply: addressing::fold_load_addr_amc_into_next_memory_access,
        },
        // Immediate.
        Rule {
            name: "merge_regimm_arithmetic_with_next",
            target: RuleTarget::Op(Opcode::OpBinaryRegImm),
            apply: immediate::merge_regimm_arithmetic_with_next,
        },
        Rule {
            name: "fold_loadimm_into_next_copy",
            target: RuleTarget::Op(Opcode::LoadRegImm),
            apply: immediate::fold_loadimm_into_next_copy,
        },
        Rule {
            name: "fold_loadimm_into_next_binary",
            target: RuleTarget::Op(Opcode::LoadRegImm),
            apply: immediate::fold_loadimm_into_next_binary,
        },
        Rule {
            name: "fold_loadimm_into_next_compare",
            target: RuleTarget::Op(Opcode::LoadRegImm),
            apply: immediate::fold_loadimm_into_next_compare,
        },
        Rule {
            name: "fold_loadimm_into_next_mem_store",
            target: RuleTarget::Op(Opcode::LoadRegImm),
            apply: immediate::fold_loadimm_into_next_mem_store,
        },
        Rule {
            name: "fold_adjacent_memimm32_stores",
            target: RuleTarget::Op(Opcode::LoadMemImm),
            apply: immediate::fold_adjacent_memimm32_stores,
        },
        // Copy.
        Rule {
            name: "forward_copy_into_next_binary_source",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::forward_copy_into_next_binary_source,
        },
        Rule {
            name: "forward_copy_into_next_compare_source",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::forward_copy_into_next_compare_source,
        },
        Rule {
            name: "fold_copy_twin_load_mem_reuse",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::fold_copy_twin_load_mem_reuse,
        },
        Rule {
            name: "fold_copy_op_copy_back",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::fold_copy_op_copy_back,
        },
        Rule {
            name: "fold_copy_unary_copy_back",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::fold_copy_unary_copy_back,
        },
        Rule {
            name: "fold_copy_back_with_previous_op",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::fold_copy_back_with_previous_op,
        },
        Rule {
            name: "coalesce_copy_instruction",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::coalesce_copy_instruction,
        },
        Rule {
            name: "remove_overwritten_copy",
            target: RuleTarget::Op(Opcode::LoadRegReg),
            apply: copy::remove_overwritten_copy,
        },
        // Cleanup.
        Rule {
            name: "canonicalize_cmp_reg_imm_zero",
            target: RuleTarget::Any,
            apply: cleanup::canonicalize_cmp_reg_imm_zero,
        },
        Rule {
            name: "fold_setcond_zeroext_copy",
            target: RuleTarget::Any,
            apply: cleanup::fold_setcond_zeroext_copy,
        },
        Rule {
            name: "remove_no_op_instruction",
            target: RuleTarget::Any,
            apply: cleanup::remove_no_op_instruction,
        },
    ];
    RULES
}

pub struct Peephole;

impl Pass for Peephole {
    fn name(&self) -> &'static str {
        "peephole"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let mut changed = false;
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

            let cursor = Cursor { inst_ref: r, next };
            let mut applied = false;
            for rule in rules() {
                let applicable = match rule.target {
                    RuleTarget::Any => true,
                    RuleTarget::Op(opcode) => inst.opcode == opcode,
                };
                if !applicable {
                    continue;
                }
                if (rule.apply)(ctx, &cursor) {
                    log::trace!("peephole: {}", rule.name);
                    changed = true;
                    applied = true;
                    break;
                }
            }

            if applied {
                // Resume after the rewrite; restart when the instruction we
                // had lined up as "next" was itself consumed.
                if !next.is_valid() || ctx.insts.get(next).is_some() {
                    r = next;
                } else {
                    r = ctx.insts.first();
                }
            } else {
                r = next;
            }
        }
        Ok(changed)
    }
}

/// Is `reg` dead after `start` in the local region: not read before its
/// next full redefinition or a dataflow barrier?
pub(crate) fn is_copy_dead_after(ctx: &PassContext, start: Ref, reg: Reg) -> bool {
    let mut r = start;
    while r.is_valid() {
        let inst = match ctx.inst(r) {
            Some(inst) => inst,
            None => return true,
        };
        let use_def = ctx.use_def(&inst);
        if use_def.uses.contains(&reg) {
            return false;
        }
        if use_def.defs.contains(&reg) {
            return true;
        }
        if info::is_local_dataflow_barrier(&inst, &use_def) {
            return true;
        }
        r = ctx.insts.next(r);
    }
    true
}

/// Deadness query for temporaries consumed by addressing folds; same
/// local-region walk as [`is_copy_dead_after`].
pub(crate) fn is_temp_dead_for_address_fold(ctx: &PassContext, start: Ref, reg: Reg) -> bool {
    is_copy_dead_after(ctx, start, reg)
}

/// Are the CPU flags dead after `start`: is the next flag event a
/// redefinition or a barrier rather than a use?
pub(crate) fn are_flags_dead_after(ctx: &PassContext, start: Ref) -> bool {
    let mut r = start;
    while r.is_valid() {
        let inst = match ctx.inst(r) {
            Some(inst) => inst,
            None => return true,
        };
        if info::uses_cpu_flags(&inst) {
            return false;
        }
        if info::defines_cpu_flags(&inst) {
            return true;
        }
        let use_def = ctx.use_def(&inst);
        if info::is_local_dataflow_barrier(&inst, &use_def) {
            return true;
        }
        r = ctx.insts.next(r);
    }
    true
}
