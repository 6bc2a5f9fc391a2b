//! Structural queries over instructions.
//!
//! Everything a pass needs to know about an opcode's shape is answered
//! here: which operand slots are register uses or defs, which instructions
//! define or consume the CPU flags, and where a memory base/offset pair
//! lives. No other module hard-codes operand indices for these questions.
//!
//! The implicit architectural operands of the shift and divide families
//! (RCX count, RDX:RAX pair) are folded into the use/def sets directly;
//! this backend targets exactly one ISA and every consumer of these sets
//! wants the conservative answer.

use crate::ir::instructions::{Inst, Opcode, Operand};
use crate::ir::ops::AluOp;
use crate::ir::reg::Reg;
use crate::isa::x64::regs;
use smallvec::SmallVec;

/// The registers an instruction reads and writes, plus whether it is a
/// call (a barrier for every block-local analysis).
#[derive(Debug, Default)]
pub struct UseDef {
    pub uses: SmallVec<[Reg; 4]>,
    pub defs: SmallVec<[Reg; 4]>,
    pub is_call: bool,
}

/// One register slot of an instruction: the operand index and whether the
/// slot is read, written, or both.
#[derive(Clone, Copy, Debug)]
pub struct RegOperand {
    pub slot: u8,
    pub is_use: bool,
    pub is_def: bool,
}

impl RegOperand {
    fn use_(slot: u8) -> Self {
        RegOperand { slot, is_use: true, is_def: false }
    }

    fn def(slot: u8) -> Self {
        RegOperand { slot, is_use: false, is_def: true }
    }

    fn use_def(slot: u8) -> Self {
        RegOperand { slot, is_use: true, is_def: true }
    }
}

/// Is this instruction a block terminator?
pub fn is_terminator(inst: &Inst) -> bool {
    matches!(
        inst.opcode,
        Opcode::JumpCond | Opcode::JumpCondImm | Opcode::JumpReg | Opcode::JumpTable | Opcode::Ret
    )
}

/// Is this instruction an unconditional transfer of control?
pub fn is_unconditional_jump(inst: &Inst, ops: &[Operand]) -> bool {
    match inst.opcode {
        Opcode::JumpCond | Opcode::JumpCondImm => {
            ops[0].cond() == crate::ir::condcodes::Cond::Unconditional
        }
        Opcode::JumpReg | Opcode::JumpTable => true,
        _ => false,
    }
}

/// Does this instruction consume the CPU flags?
pub fn uses_cpu_flags(inst: &Inst) -> bool {
    matches!(
        inst.opcode,
        Opcode::JumpCond | Opcode::JumpCondImm | Opcode::SetCondReg | Opcode::LoadCondRegReg
    )
}

/// Does this instruction define the CPU flags?
pub fn defines_cpu_flags(inst: &Inst) -> bool {
    matches!(
        inst.opcode,
        Opcode::CmpRegReg
            | Opcode::CmpRegZero
            | Opcode::CmpRegImm
            | Opcode::CmpMemReg
            | Opcode::CmpMemImm
            | Opcode::ClearReg
            | Opcode::OpUnaryMem
            | Opcode::OpUnaryReg
            | Opcode::OpBinaryRegReg
            | Opcode::OpBinaryRegImm
            | Opcode::OpBinaryRegMem
            | Opcode::OpBinaryMemReg
            | Opcode::OpBinaryMemImm
    )
}

/// Labels, calls, and terminators invalidate every block-local analysis.
pub fn is_local_dataflow_barrier(inst: &Inst, use_def: &UseDef) -> bool {
    inst.opcode == Opcode::Label || use_def.is_call || is_terminator(inst)
}

/// The `(base, offset)` operand indices of a single-base memory access.
pub fn mem_base_offset_slots(opcode: Opcode) -> Option<(u8, u8)> {
    match opcode {
        Opcode::LoadRegMem => Some((1, 3)),
        Opcode::LoadMemReg => Some((0, 3)),
        Opcode::LoadMemImm => Some((0, 2)),
        Opcode::LoadSignedExtRegMem => Some((1, 4)),
        Opcode::LoadZeroExtRegMem => Some((1, 4)),
        Opcode::LoadAddrRegMem => Some((1, 3)),
        Opcode::CmpMemReg => Some((0, 3)),
        Opcode::CmpMemImm => Some((0, 2)),
        Opcode::OpUnaryMem => Some((0, 3)),
        Opcode::OpBinaryRegMem => Some((1, 4)),
        Opcode::OpBinaryMemReg => Some((0, 4)),
        Opcode::OpBinaryMemImm => Some((0, 3)),
        _ => None,
    }
}

/// The register slots of an instruction with their use/def roles, in
/// operand order. Sentinel registers (no-base) are still reported; callers
/// that care filter them.
pub fn reg_operands(inst: &Inst) -> SmallVec<[RegOperand; 4]> {
    use Opcode::*;
    let mut out = SmallVec::new();
    match inst.opcode {
        LoadRegImm | SetCondReg | ClearReg | Pop | LoadSymRelocAddr | LoadSymRelocValue => {
            out.push(RegOperand::def(0));
        }
        LoadRegReg | LoadRegMem | LoadZeroExtRegReg | LoadZeroExtRegMem | LoadSignedExtRegReg
        | LoadSignedExtRegMem | LoadAddrRegMem => {
            out.push(RegOperand::def(0));
            out.push(RegOperand::use_(1));
        }
        LoadMemReg | CmpMemReg | OpBinaryMemReg | CmpRegReg => {
            out.push(RegOperand::use_(0));
            out.push(RegOperand::use_(1));
        }
        LoadMemImm | CmpRegImm | CmpRegZero | CmpMemImm | OpUnaryMem
        | OpBinaryMemImm | Push | JumpReg | CallReg => {
            out.push(RegOperand::use_(0));
        }
        LoadAddrAmcRegMem | LoadAmcRegMem => {
            out.push(RegOperand::def(0));
            out.push(RegOperand::use_(1));
            out.push(RegOperand::use_(2));
        }
        LoadAmcMemReg => {
            out.push(RegOperand::use_(0));
            out.push(RegOperand::use_(1));
            out.push(RegOperand::use_(2));
        }
        LoadAmcMemImm => {
            out.push(RegOperand::use_(0));
            out.push(RegOperand::use_(1));
        }
        OpUnaryReg => {
            out.push(RegOperand::use_def(0));
        }
        OpBinaryRegReg => {
            out.push(RegOperand::use_def(0));
            out.push(RegOperand::use_(1));
        }
        OpBinaryRegImm => {
            out.push(RegOperand::use_def(0));
        }
        OpBinaryRegMem => {
            out.push(RegOperand::use_def(0));
            out.push(RegOperand::use_(1));
        }
        OpTernaryRegRegReg => {
            out.push(RegOperand::use_def(0));
            out.push(RegOperand::use_(1));
            out.push(RegOperand::use_(2));
        }
        LoadCondRegReg => {
            // cmov leaves the destination untouched when the condition
            // fails, so the destination is also a use.
            out.push(RegOperand::use_def(0));
            out.push(RegOperand::use_(1));
        }
        JumpTable => {
            // Both registers are consumed and clobbered by the emitted
            // dispatch sequence.
            out.push(RegOperand::use_def(0));
            out.push(RegOperand::use_def(1));
        }
        JumpCond | JumpCondImm | Ret | Label | Debug | Nop | CallLocal | CallExtern => {}
    }
    out
}

fn binary_alu_op(inst: &Inst, ops: &[Operand]) -> Option<AluOp> {
    match inst.opcode {
        Opcode::OpBinaryRegReg | Opcode::OpBinaryRegMem | Opcode::OpBinaryMemReg => {
            Some(ops[3].alu_op())
        }
        Opcode::OpBinaryRegImm => Some(ops[2].alu_op()),
        Opcode::OpBinaryMemImm => Some(ops[2].alu_op()),
        _ => None,
    }
}

/// Collect the full use/def sets of an instruction, including the
/// architectural implicit operands of the shift, divide, and
/// compare-exchange families.
pub fn collect_use_def(inst: &Inst, ops: &[Operand]) -> UseDef {
    let mut out = UseDef::default();
    for ro in reg_operands(inst) {
        let reg = ops[ro.slot as usize].reg();
        if !reg.is_valid() || reg.is_no_base() {
            continue;
        }
        if ro.is_use {
            out.uses.push(reg);
        }
        if ro.is_def {
            out.defs.push(reg);
        }
    }

    if let Some(op) = binary_alu_op(inst, ops) {
        if op.is_shift() {
            out.uses.push(regs::rcx());
        } else if op.is_div_family() {
            out.uses.push(regs::rax());
            out.uses.push(regs::rdx());
            out.defs.push(regs::rax());
            out.defs.push(regs::rdx());
        }
    }
    if inst.opcode == Opcode::OpTernaryRegRegReg && ops[3].alu_op() == AluOp::Cmpxchg {
        out.uses.push(regs::rax());
        out.defs.push(regs::rax());
    }

    out.is_call = matches!(
        inst.opcode,
        Opcode::CallLocal | Opcode::CallExtern | Opcode::CallReg
    );
    out
}
