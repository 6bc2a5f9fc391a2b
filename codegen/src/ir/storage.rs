//! Instruction and operand storage.
//!
//! Instructions live in a [`PagedList`]: stable refs, in-place insertion,
//! tombstone erasure. Operands live in a parallel [`PagedVec`] of fixed
//! blocks of [`MAX_OPERANDS`] slots, so an instruction's operands are
//! always contiguous and never move.

use crate::ir::instructions::{Inst, Opcode, Operand, MAX_OPERANDS};
use ingot_entity::{PagedList, PagedVec, Ref};

/// The ordered instruction store of one function.
pub type InstStorage = PagedList<Inst>;

/// Out-of-line operand blocks.
pub struct OperandPool {
    blocks: PagedVec<[Operand; MAX_OPERANDS]>,
}

impl OperandPool {
    pub fn new() -> Self {
        OperandPool { blocks: PagedVec::new() }
    }

    /// Allocate a block holding `operands`, padding the tail with
    /// [`Operand::None`].
    pub fn alloc(&mut self, operands: &[Operand]) -> Ref {
        assert!(operands.len() <= MAX_OPERANDS);
        let mut block = [Operand::None; MAX_OPERANDS];
        block[..operands.len()].copy_from_slice(operands);
        self.blocks.push(block)
    }

    /// The operand slice of an instruction.
    pub fn slice(&self, inst: &Inst) -> &[Operand] {
        &self.blocks[inst.operands][..inst.num_operands as usize]
    }

    /// The mutable operand slice of an instruction.
    pub fn slice_mut(&mut self, inst: &Inst) -> &mut [Operand] {
        &mut self.blocks[inst.operands][..inst.num_operands as usize]
    }

    /// The full 8-slot block, used by rewrites that change an opcode to a
    /// layout with more operands than the original allocation.
    pub fn block_mut(&mut self, inst: &Inst) -> &mut [Operand; MAX_OPERANDS] {
        &mut self.blocks[inst.operands]
    }

    /// Copy out up to a full block, for snapshot/rollback in rewrites.
    pub fn snapshot(&self, inst: &Inst) -> [Operand; MAX_OPERANDS] {
        self.blocks[inst.operands]
    }

    /// Restore a snapshot taken with [`OperandPool::snapshot`].
    pub fn restore(&mut self, inst: &Inst, snapshot: [Operand; MAX_OPERANDS]) {
        self.blocks[inst.operands] = snapshot;
    }
}

impl Default for OperandPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Append an instruction with the given operands.
pub fn push_inst(
    insts: &mut InstStorage,
    pool: &mut OperandPool,
    opcode: Opcode,
    operands: &[Operand],
) -> Ref {
    debug_assert_eq!(operands.len(), opcode.num_operands(), "{opcode:?}");
    let operands_ref = pool.alloc(operands);
    insts.push_back(Inst {
        opcode,
        num_operands: operands.len() as u8,
        operands: operands_ref,
    })
}

/// Insert an instruction with the given operands immediately before `at`.
pub fn insert_inst_before(
    insts: &mut InstStorage,
    pool: &mut OperandPool,
    at: Ref,
    opcode: Opcode,
    operands: &[Operand],
) -> Ref {
    debug_assert_eq!(operands.len(), opcode.num_operands(), "{opcode:?}");
    let operands_ref = pool.alloc(operands);
    insts.insert_before(
        at,
        Inst {
            opcode,
            num_operands: operands.len() as u8,
            operands: operands_ref,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ops::OpBits;
    use crate::ir::reg::Reg;

    #[test]
    fn operand_blocks_are_padded() {
        let mut pool = OperandPool::new();
        let mut insts = InstStorage::new();
        let r = push_inst(
            &mut insts,
            &mut pool,
            Opcode::ClearReg,
            &[Operand::Reg(Reg::int(0)), Operand::Bits(OpBits::B64)],
        );
        let inst = *insts.get(r).unwrap();
        assert_eq!(pool.slice(&inst).len(), 2);
        assert_eq!(pool.block_mut(&inst)[7], Operand::None);
    }

    #[test]
    fn snapshot_restores_after_mutation() {
        let mut pool = OperandPool::new();
        let mut insts = InstStorage::new();
        let r = push_inst(
            &mut insts,
            &mut pool,
            Opcode::LoadRegImm,
            &[
                Operand::Reg(Reg::virt_int(0)),
                Operand::Bits(OpBits::B32),
                Operand::Imm(11),
            ],
        );
        let inst = *insts.get(r).unwrap();
        let snap = pool.snapshot(&inst);
        pool.slice_mut(&inst)[2] = Operand::Imm(99);
        assert_eq!(pool.slice(&inst)[2].imm(), 99);
        pool.restore(&inst, snap);
        assert_eq!(pool.slice(&inst)[2].imm(), 11);
    }
}
