//! The pass manager and the pass pipeline.
//!
//! Passes run in registration order, exactly once per `run_passes` call,
//! single-threaded, over one function's storage. A pass reports whether it
//! mutated the IR; scheduling is fixed and a `true` return never re-runs
//! other passes.

pub mod branch_fold;
pub mod const_prop;
pub mod emit;
pub mod folding;
pub mod legalize;
pub mod peephole;
pub mod prolog;
pub mod regalloc;
pub mod store_forward;

use crate::abi::CallConvKind;
use crate::error::CodegenResult;
use crate::ir::builder::JumpTableData;
use crate::ir::data::DataSegment;
use crate::ir::instructions::{Inst, Operand};
use crate::ir::reg::Reg;
use crate::ir::storage::{InstStorage, OperandPool};
use crate::isa::x64::X64Encoder;
use ingot_entity::Ref;
use smallvec::SmallVec;

/// Frame facts produced by register allocation and consumed by the
/// prolog/epilog pass.
#[derive(Default)]
pub struct FrameInfo {
    /// Persistent registers the body modifies, in allocation order.
    pub used_persistent: SmallVec<[Reg; 8]>,
    /// Number of 8-byte spill slots.
    pub spill_slots: u32,
    /// Total `sub rsp` amount, filled in by the prolog pass.
    pub frame_size: u32,
}

/// Everything a pass may touch while running over one function.
pub struct PassContext<'a> {
    pub insts: &'a mut InstStorage,
    pub operands: &'a mut OperandPool,
    pub encoder: &'a mut X64Encoder,
    pub data: &'a mut DataSegment,
    pub call_conv: CallConvKind,
    pub preserve_persistent_regs: bool,
    pub frame: FrameInfo,
    pub jump_tables: &'a [JumpTableData],
    pub symbol_names: &'a [String],
    pub func_name: &'a str,
}

impl<'a> PassContext<'a> {
    /// Copy out an instruction; `None` for erased refs.
    pub fn inst(&self, r: Ref) -> Option<Inst> {
        self.insts.get(r).copied()
    }

    /// The operand slice of an instruction.
    pub fn ops(&self, inst: &Inst) -> &[Operand] {
        self.operands.slice(inst)
    }

    /// The use/def sets of an instruction.
    pub fn use_def(&self, inst: &Inst) -> crate::ir::info::UseDef {
        crate::ir::info::collect_use_def(inst, self.operands.slice(inst))
    }
}

/// One micro-pass.
pub trait Pass {
    fn name(&self) -> &'static str;
    fn run(&mut self, ctx: &mut PassContext) -> CodegenResult<bool>;
}

/// Runs registered passes in order.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager { passes: Vec::new() }
    }

    pub fn add(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    pub fn run_passes(&mut self, ctx: &mut PassContext) -> CodegenResult<()> {
        for pass in &mut self.passes {
            let changed = pass.run(ctx)?;
            log::debug!("pass {}: changed={}", pass.name(), changed);
        }
        Ok(())
    }
}
