//! The Micro-IR builder.
//!
//! The builder is the only component that *creates* instructions; passes
//! mutate, erase, or insert through the storage interface. Each `encode_*`
//! entry point appends one instruction with the operand layout declared in
//! [`crate::ir::instructions`].

use crate::ir::condcodes::Cond;
use crate::ir::instructions::{Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::ir::reg::Reg;
use crate::ir::storage::{push_inst, InstStorage, OperandPool};
use ingot_entity::Ref;

/// A forward-referencable position in the instruction stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// The targets of one jump table, in entry order.
#[derive(Clone, Debug, Default)]
pub struct JumpTableData {
    pub entries: Vec<Label>,
}

/// An interned call-target or data symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolId(pub u32);

/// Builds the Micro-IR body of one function.
pub struct MicroBuilder {
    pub insts: InstStorage,
    pub operands: OperandPool,
    next_label: u32,
    next_virt_int: u32,
    next_virt_float: u32,
    jump_tables: Vec<JumpTableData>,
    symbol_names: Vec<String>,
}

impl MicroBuilder {
    pub fn new() -> Self {
        MicroBuilder {
            insts: InstStorage::new(),
            operands: OperandPool::new(),
            next_label: 0,
            next_virt_int: 0,
            next_virt_float: 0,
            jump_tables: Vec::new(),
            symbol_names: Vec::new(),
        }
    }

    fn push(&mut self, opcode: Opcode, operands: &[Operand]) -> Ref {
        push_inst(&mut self.insts, &mut self.operands, opcode, operands)
    }

    /// A fresh virtual integer register.
    pub fn alloc_virt_int(&mut self) -> Reg {
        let index = self.next_virt_int;
        self.next_virt_int += 1;
        Reg::virt_int(index)
    }

    /// A fresh virtual float register.
    pub fn alloc_virt_float(&mut self) -> Reg {
        let index = self.next_virt_float;
        self.next_virt_float += 1;
        Reg::virt_float(index)
    }

    /// Intern a symbol name for call and data references.
    pub fn intern_symbol(&mut self, name: &str) -> SymbolId {
        if let Some(pos) = self.symbol_names.iter().position(|n| n == name) {
            return SymbolId(pos as u32);
        }
        self.symbol_names.push(name.to_string());
        SymbolId(self.symbol_names.len() as u32 - 1)
    }

    /// The interned symbol names, in id order.
    pub fn symbol_names(&self) -> &[String] {
        &self.symbol_names
    }

    /// The recorded jump tables, in id order.
    pub fn jump_tables(&self) -> &[JumpTableData] {
        &self.jump_tables
    }

    // ---- labels and control flow -------------------------------------

    /// Allocate a label that can be bound and jumped to.
    pub fn create_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    /// Bind `label` at the current end of the stream.
    pub fn bind_label(&mut self, label: Label) -> Ref {
        self.push(Opcode::Label, &[Operand::Imm(label.0 as u64)])
    }

    pub fn encode_jump_cond(&mut self, cond: Cond, target: Label) -> Ref {
        self.push(
            Opcode::JumpCond,
            &[Operand::Cond(cond), Operand::Imm(target.0 as u64)],
        )
    }

    /// Jump to an already-resolved byte offset within the function.
    pub fn encode_jump_cond_imm(&mut self, cond: Cond, target_offset: u64) -> Ref {
        self.push(
            Opcode::JumpCondImm,
            &[Operand::Cond(cond), Operand::Imm(target_offset)],
        )
    }

    pub fn encode_jump_reg(&mut self, reg: Reg) -> Ref {
        self.push(Opcode::JumpReg, &[Operand::Reg(reg)])
    }

    /// Dispatch through a table of labels. `table_reg` and `index_reg` are
    /// clobbered by the emitted sequence; `index_reg` holds the zero-based
    /// case index on entry.
    pub fn encode_jump_table(
        &mut self,
        table_reg: Reg,
        index_reg: Reg,
        data: JumpTableData,
    ) -> Ref {
        let id = self.jump_tables.len() as u64;
        self.jump_tables.push(data);
        self.push(
            Opcode::JumpTable,
            &[
                Operand::Reg(table_reg),
                Operand::Reg(index_reg),
                Operand::Imm(id),
            ],
        )
    }

    pub fn encode_ret(&mut self) -> Ref {
        self.push(Opcode::Ret, &[])
    }

    pub fn encode_nop(&mut self) -> Ref {
        self.push(Opcode::Nop, &[])
    }

    pub fn encode_debug(&mut self) -> Ref {
        self.push(Opcode::Debug, &[])
    }

    // ---- calls --------------------------------------------------------

    pub fn encode_call_local(&mut self, name: &str) -> Ref {
        let sym = self.intern_symbol(name);
        self.push(Opcode::CallLocal, &[Operand::Imm(sym.0 as u64)])
    }

    pub fn encode_call_extern(&mut self, name: &str) -> Ref {
        let sym = self.intern_symbol(name);
        self.push(Opcode::CallExtern, &[Operand::Imm(sym.0 as u64)])
    }

    pub fn encode_call_reg(&mut self, reg: Reg) -> Ref {
        self.push(Opcode::CallReg, &[Operand::Reg(reg)])
    }

    // ---- moves and loads ----------------------------------------------

    pub fn encode_load_reg_imm(&mut self, dst: Reg, value: u64, bits: OpBits) -> Ref {
        self.push(
            Opcode::LoadRegImm,
            &[Operand::Reg(dst), Operand::Bits(bits), Operand::Imm(value)],
        )
    }

    pub fn encode_load_reg_reg(&mut self, dst: Reg, src: Reg, bits: OpBits) -> Ref {
        self.push(
            Opcode::LoadRegReg,
            &[Operand::Reg(dst), Operand::Reg(src), Operand::Bits(bits)],
        )
    }

    pub fn encode_load_reg_mem(&mut self, dst: Reg, base: Reg, offset: u64, bits: OpBits) -> Ref {
        self.push(
            Opcode::LoadRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Bits(bits),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_load_mem_reg(&mut self, base: Reg, offset: u64, src: Reg, bits: OpBits) -> Ref {
        self.push(
            Opcode::LoadMemReg,
            &[
                Operand::Reg(base),
                Operand::Reg(src),
                Operand::Bits(bits),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_load_mem_imm(&mut self, base: Reg, offset: u64, value: u64, bits: OpBits) -> Ref {
        self.push(
            Opcode::LoadMemImm,
            &[
                Operand::Reg(base),
                Operand::Bits(bits),
                Operand::Imm(offset),
                Operand::Imm(value),
            ],
        )
    }

    pub fn encode_load_zero_ext_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        dst_bits: OpBits,
        src_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadZeroExtRegReg,
            &[
                Operand::Reg(dst),
                Operand::Reg(src),
                Operand::Bits(dst_bits),
                Operand::Bits(src_bits),
            ],
        )
    }

    pub fn encode_load_signed_ext_reg_reg(
        &mut self,
        dst: Reg,
        src: Reg,
        dst_bits: OpBits,
        src_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadSignedExtRegReg,
            &[
                Operand::Reg(dst),
                Operand::Reg(src),
                Operand::Bits(dst_bits),
                Operand::Bits(src_bits),
            ],
        )
    }

    pub fn encode_load_zero_ext_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        dst_bits: OpBits,
        src_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadZeroExtRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Bits(dst_bits),
                Operand::Bits(src_bits),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_load_signed_ext_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        dst_bits: OpBits,
        src_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadSignedExtRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Bits(dst_bits),
                Operand::Bits(src_bits),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_load_addr_reg_mem(&mut self, dst: Reg, base: Reg, offset: u64) -> Ref {
        self.push(
            Opcode::LoadAddrRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Bits(OpBits::B64),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_load_addr_amc_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadAddrAmcRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Reg(index),
                Operand::Bits(OpBits::B64),
                Operand::Bits(amc_bits),
                Operand::Imm(scale),
                Operand::Imm(disp),
            ],
        )
    }

    pub fn encode_load_amc_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        dst_bits: OpBits,
        amc_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadAmcRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Reg(index),
                Operand::Bits(dst_bits),
                Operand::Bits(amc_bits),
                Operand::Imm(scale),
                Operand::Imm(disp),
            ],
        )
    }

    pub fn encode_load_amc_mem_reg(
        &mut self,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
        src: Reg,
        src_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadAmcMemReg,
            &[
                Operand::Reg(base),
                Operand::Reg(index),
                Operand::Reg(src),
                Operand::Bits(amc_bits),
                Operand::Bits(src_bits),
                Operand::Imm(scale),
                Operand::Imm(disp),
            ],
        )
    }

    pub fn encode_load_amc_mem_imm(
        &mut self,
        base: Reg,
        index: Reg,
        scale: u64,
        disp: u64,
        amc_bits: OpBits,
        value: u64,
        val_bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadAmcMemImm,
            &[
                Operand::Reg(base),
                Operand::Reg(index),
                Operand::Bits(amc_bits),
                Operand::Bits(val_bits),
                Operand::Imm(scale),
                Operand::Imm(disp),
                Operand::Imm(value),
            ],
        )
    }

    pub fn encode_load_sym_reloc_addr(&mut self, dst: Reg, sym: SymbolId, offset: u64) -> Ref {
        self.push(
            Opcode::LoadSymRelocAddr,
            &[
                Operand::Reg(dst),
                Operand::Imm(sym.0 as u64),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_load_sym_reloc_value(
        &mut self,
        dst: Reg,
        sym: SymbolId,
        offset: u64,
        bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::LoadSymRelocValue,
            &[
                Operand::Reg(dst),
                Operand::Imm(sym.0 as u64),
                Operand::Imm(offset),
                Operand::Bits(bits),
            ],
        )
    }

    // ---- arithmetic ---------------------------------------------------

    pub fn encode_op_unary_reg(&mut self, reg: Reg, op: AluOp, bits: OpBits) -> Ref {
        self.push(
            Opcode::OpUnaryReg,
            &[Operand::Reg(reg), Operand::Op(op), Operand::Bits(bits)],
        )
    }

    pub fn encode_op_unary_mem(&mut self, base: Reg, offset: u64, op: AluOp, bits: OpBits) -> Ref {
        self.push(
            Opcode::OpUnaryMem,
            &[
                Operand::Reg(base),
                Operand::Op(op),
                Operand::Bits(bits),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_op_binary_reg_reg(&mut self, dst: Reg, src: Reg, op: AluOp, bits: OpBits) -> Ref {
        self.push(
            Opcode::OpBinaryRegReg,
            &[
                Operand::Reg(dst),
                Operand::Reg(src),
                Operand::Bits(bits),
                Operand::Op(op),
            ],
        )
    }

    pub fn encode_op_binary_reg_imm(&mut self, dst: Reg, value: u64, op: AluOp, bits: OpBits) -> Ref {
        self.push(
            Opcode::OpBinaryRegImm,
            &[
                Operand::Reg(dst),
                Operand::Bits(bits),
                Operand::Op(op),
                Operand::Imm(value),
            ],
        )
    }

    pub fn encode_op_binary_reg_mem(
        &mut self,
        dst: Reg,
        base: Reg,
        offset: u64,
        op: AluOp,
        bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::OpBinaryRegMem,
            &[
                Operand::Reg(dst),
                Operand::Reg(base),
                Operand::Bits(bits),
                Operand::Op(op),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_op_binary_mem_reg(
        &mut self,
        base: Reg,
        offset: u64,
        src: Reg,
        op: AluOp,
        bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::OpBinaryMemReg,
            &[
                Operand::Reg(base),
                Operand::Reg(src),
                Operand::Bits(bits),
                Operand::Op(op),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_op_binary_mem_imm(
        &mut self,
        base: Reg,
        offset: u64,
        value: u64,
        op: AluOp,
        bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::OpBinaryMemImm,
            &[
                Operand::Reg(base),
                Operand::Bits(bits),
                Operand::Op(op),
                Operand::Imm(offset),
                Operand::Imm(value),
            ],
        )
    }

    pub fn encode_op_ternary_reg_reg_reg(
        &mut self,
        r0: Reg,
        r1: Reg,
        r2: Reg,
        op: AluOp,
        bits: OpBits,
    ) -> Ref {
        self.push(
            Opcode::OpTernaryRegRegReg,
            &[
                Operand::Reg(r0),
                Operand::Reg(r1),
                Operand::Reg(r2),
                Operand::Op(op),
                Operand::Bits(bits),
            ],
        )
    }

    // ---- compares and conditionals ------------------------------------

    pub fn encode_cmp_reg_reg(&mut self, lhs: Reg, rhs: Reg, bits: OpBits) -> Ref {
        self.push(
            Opcode::CmpRegReg,
            &[Operand::Reg(lhs), Operand::Reg(rhs), Operand::Bits(bits)],
        )
    }

    pub fn encode_cmp_reg_imm(&mut self, reg: Reg, value: u64, bits: OpBits) -> Ref {
        self.push(
            Opcode::CmpRegImm,
            &[Operand::Reg(reg), Operand::Bits(bits), Operand::Imm(value)],
        )
    }

    pub fn encode_cmp_reg_zero(&mut self, reg: Reg, bits: OpBits) -> Ref {
        self.push(
            Opcode::CmpRegZero,
            &[Operand::Reg(reg), Operand::Bits(bits)],
        )
    }

    pub fn encode_cmp_mem_reg(&mut self, base: Reg, offset: u64, rhs: Reg, bits: OpBits) -> Ref {
        self.push(
            Opcode::CmpMemReg,
            &[
                Operand::Reg(base),
                Operand::Reg(rhs),
                Operand::Bits(bits),
                Operand::Imm(offset),
            ],
        )
    }

    pub fn encode_cmp_mem_imm(&mut self, base: Reg, offset: u64, value: u64, bits: OpBits) -> Ref {
        self.push(
            Opcode::CmpMemImm,
            &[
                Operand::Reg(base),
                Operand::Bits(bits),
                Operand::Imm(offset),
                Operand::Imm(value),
            ],
        )
    }

    pub fn encode_set_cond_reg(&mut self, dst: Reg, cond: Cond) -> Ref {
        self.push(
            Opcode::SetCondReg,
            &[Operand::Reg(dst), Operand::Cond(cond)],
        )
    }

    pub fn encode_load_cond_reg_reg(&mut self, dst: Reg, src: Reg, cond: Cond, bits: OpBits) -> Ref {
        self.push(
            Opcode::LoadCondRegReg,
            &[
                Operand::Reg(dst),
                Operand::Reg(src),
                Operand::Cond(cond),
                Operand::Bits(bits),
            ],
        )
    }

    pub fn encode_clear_reg(&mut self, reg: Reg, bits: OpBits) -> Ref {
        self.push(Opcode::ClearReg, &[Operand::Reg(reg), Operand::Bits(bits)])
    }

    pub fn encode_push(&mut self, reg: Reg) -> Ref {
        self.push(Opcode::Push, &[Operand::Reg(reg)])
    }

    pub fn encode_pop(&mut self, reg: Reg) -> Ref {
        self.push(Opcode::Pop, &[Operand::Reg(reg)])
    }

    // ---- composite helpers --------------------------------------------

    /// Expand a byte-wise copy of `size` bytes from `[src]` to `[dst]` into
    /// the widest possible load/store pairs through `tmp`.
    pub fn emit_mem_copy(&mut self, dst: Reg, src: Reg, tmp: Reg, size: u32) {
        let mut offset = 0u64;
        let mut remain = size;
        while remain >= 8 {
            self.encode_load_reg_mem(tmp, src, offset, OpBits::B64);
            self.encode_load_mem_reg(dst, offset, tmp, OpBits::B64);
            offset += 8;
            remain -= 8;
        }
        if remain >= 4 {
            self.encode_load_reg_mem(tmp, src, offset, OpBits::B32);
            self.encode_load_mem_reg(dst, offset, tmp, OpBits::B32);
            offset += 4;
            remain -= 4;
        }
        if remain >= 2 {
            self.encode_load_reg_mem(tmp, src, offset, OpBits::B16);
            self.encode_load_mem_reg(dst, offset, tmp, OpBits::B16);
            offset += 2;
            remain -= 2;
        }
        if remain >= 1 {
            self.encode_load_reg_mem(tmp, src, offset, OpBits::B8);
            self.encode_load_mem_reg(dst, offset, tmp, OpBits::B8);
        }
    }
}

impl Default for MicroBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instructions::Opcode;

    #[test]
    fn builder_appends_in_order() {
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 5, OpBits::B32);
        b.encode_cmp_reg_imm(v0, 5, OpBits::B32);
        b.encode_ret();
        let opcodes: Vec<Opcode> = b.insts.iter().map(|(_, i)| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::LoadRegImm, Opcode::CmpRegImm, Opcode::Ret]
        );
    }

    #[test]
    fn symbols_are_interned_once() {
        let mut b = MicroBuilder::new();
        let a = b.intern_symbol("memcpy");
        let b2 = b.intern_symbol("memset");
        let a2 = b.intern_symbol("memcpy");
        assert_eq!(a, a2);
        assert_ne!(a, b2);
        assert_eq!(b.symbol_names().len(), 2);
    }

    #[test]
    fn mem_copy_expands_by_width() {
        let mut b = MicroBuilder::new();
        let (dst, src, tmp) = (b.alloc_virt_int(), b.alloc_virt_int(), b.alloc_virt_int());
        b.emit_mem_copy(dst, src, tmp, 15);
        // 8 + 4 + 2 + 1 bytes -> four load/store pairs.
        assert_eq!(b.insts.len(), 8);
        let widths: Vec<OpBits> = b
            .insts
            .iter()
            .map(|(_, i)| b.operands.slice(i)[2].bits())
            .collect();
        assert_eq!(
            widths,
            vec![
                OpBits::B64,
                OpBits::B64,
                OpBits::B32,
                OpBits::B32,
                OpBits::B16,
                OpBits::B16,
                OpBits::B8,
                OpBits::B8
            ]
        );
    }
}
