//! Emission.
//!
//! The final walk over the Micro-IR. Every instruction is handed to the
//! encoder unchanged; this pass owns only the sequencing concerns the
//! encoder cannot see: label resolution, short/near jump selection and
//! patching, call-target symbol interning, and jump-table materialization
//! in the data segment. It never rewrites the IR.

use crate::binemit::{CpuSymbolKind, JumpFixup};
use crate::error::{CodegenResult, CodegenError};
use crate::ir::condcodes::Cond;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::passes::{Pass, PassContext};
use rustc_hash::FxHashMap;

struct JumpTablePatch {
    table_offset: u32,
    seq_end: u32,
    entries: Vec<crate::ir::Label>,
}

pub struct Emit;

impl Pass for Emit {
    fn name(&self) -> &'static str {
        "emit"
    }

    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool> {
        let fn_symbol = ctx.encoder.begin_function(ctx.func_name);
        let fn_start = ctx.encoder.function_start();

        let mut label_offsets: FxHashMap<u64, u32> = FxHashMap::default();
        let mut pending: Vec<(u64, JumpFixup)> = Vec::new();
        let mut table_patches: Vec<JumpTablePatch> = Vec::new();
        let mut const_symbol = None;

        let mut r = ctx.insts.first();
        while r.is_valid() {
            let inst = ctx.inst(r).unwrap();
            let ops = ctx.operands.snapshot(&inst);
            match inst.opcode {
                Opcode::Label => {
                    let id = ops[0].imm();
                    let here = ctx.encoder.cur_offset();
                    label_offsets.insert(id, here);
                    pending.retain(|(label, fixup)| {
                        if *label == id {
                            ctx.encoder.encode_patch_jump(fixup, here as u64);
                            false
                        } else {
                            true
                        }
                    });
                }
                Opcode::Debug => {}
                Opcode::JumpCond => {
                    let cond = ops[0].cond();
                    let id = ops[1].imm();
                    match label_offsets.get(&id) {
                        Some(&target) => {
                            // Backward jump: short when the displacement
                            // fits, near otherwise.
                            let short_start = ctx.encoder.cur_offset() as i64 + 2;
                            let bits = if short_start - target as i64 <= 127 {
                                OpBits::B8
                            } else {
                                OpBits::B32
                            };
                            let fixup = ctx.encoder.encode_jump(cond, bits);
                            ctx.encoder.encode_patch_jump(&fixup, target as u64);
                        }
                        None => {
                            let fixup = ctx.encoder.encode_jump(cond, OpBits::B32);
                            pending.push((id, fixup));
                        }
                    }
                }
                Opcode::JumpCondImm => {
                    // The target is a resolved byte offset from the
                    // function start.
                    let cond = ops[0].cond();
                    let target = fn_start as u64 + ops[1].imm();
                    let fixup = ctx.encoder.encode_jump(cond, OpBits::B32);
                    ctx.encoder.encode_patch_jump(&fixup, target);
                }
                Opcode::JumpReg => ctx.encoder.encode_jump_reg(ops[0].reg()),
                Opcode::JumpTable => {
                    let table_id = ops[2].imm() as usize;
                    let data = &ctx.jump_tables[table_id];
                    let const_symbol = *const_symbol.get_or_insert_with(|| {
                        ctx.encoder
                            .get_or_add_symbol(".rdata", CpuSymbolKind::Constants)
                    });
                    let (table_offset, seq_end) = ctx.encoder.encode_jump_table(
                        ops[0].reg(),
                        ops[1].reg(),
                        data.entries.len() as u32,
                        ctx.data,
                        const_symbol,
                        fn_symbol,
                    );
                    table_patches.push(JumpTablePatch {
                        table_offset,
                        seq_end,
                        entries: data.entries.clone(),
                    });
                }
                Opcode::Ret => ctx.encoder.encode_ret(),
                Opcode::Nop => ctx.encoder.encode_nop(),
                Opcode::Push => ctx.encoder.encode_push(ops[0].reg()),
                Opcode::Pop => ctx.encoder.encode_pop(ops[0].reg()),
                Opcode::CallLocal => {
                    let name = &ctx.symbol_names[ops[0].imm() as usize];
                    ctx.encoder.encode_call_local(name);
                }
                Opcode::CallExtern => {
                    let name = &ctx.symbol_names[ops[0].imm() as usize];
                    ctx.encoder.encode_call_extern(name);
                }
                Opcode::CallReg => ctx.encoder.encode_call_reg(ops[0].reg()),
                Opcode::LoadSymRelocAddr => {
                    let name = &ctx.symbol_names[ops[1].imm() as usize];
                    let sym = ctx.encoder.get_or_add_symbol(name, CpuSymbolKind::Extern);
                    ctx.encoder
                        .encode_load_sym_reloc_addr(ops[0].reg(), sym, ops[2].imm() as u32);
                }
                Opcode::LoadSymRelocValue => {
                    let name = &ctx.symbol_names[ops[1].imm() as usize];
                    let sym = ctx.encoder.get_or_add_symbol(name, CpuSymbolKind::Extern);
                    // Integer destinations take the absolute-address form;
                    // that is how pointer immediates reach the linker.
                    let flags = if ops[0].reg().is_float() {
                        crate::isa::x64::EmitFlags::NONE
                    } else {
                        crate::isa::x64::EmitFlags::B64
                    };
                    ctx.encoder.encode_load_sym_reloc_value(
                        ops[0].reg(),
                        sym,
                        ops[2].imm(),
                        ops[3].bits(),
                        flags,
                    );
                }
                Opcode::OpTernaryRegRegReg if ops[3].alu_op() == AluOp::Cmpxchg => {
                    // IR-level compare-exchange is atomic.
                    let slice = ctx.operands.slice(&inst);
                    ctx.encoder
                        .encode_inst(&inst, slice, crate::isa::x64::EmitFlags::LOCK);
                }
                _ => {
                    let slice = ctx.operands.slice(&inst);
                    ctx.encoder
                        .encode_inst(&inst, slice, crate::isa::x64::EmitFlags::NONE);
                }
            }
            r = ctx.insts.next(r);
        }

        if let Some((label, _)) = pending.first() {
            return Err(CodegenError::Verifier(format!(
                "unresolved jump target: label {label}"
            )));
        }

        // Jump-table entries are relative to the end of their dispatch
        // sequence.
        for patch in table_patches {
            for (i, label) in patch.entries.iter().enumerate() {
                let target = *label_offsets.get(&(label.0 as u64)).ok_or_else(|| {
                    CodegenError::Verifier(format!("unresolved jump-table target {label:?}"))
                })?;
                let rel = target as i64 - patch.seq_end as i64;
                ctx.data
                    .write_u32(patch.table_offset + i as u32 * 4, rel as i32 as u32);
            }
        }

        Ok(false)
    }
}
