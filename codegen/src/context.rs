//! The per-function compilation driver.
//!
//! A `Context` owns the module-level read-only data segment and the build
//! flags, and compiles one function at a time: the optimizing passes (at
//! O1 and above), then register allocation, prolog/epilog insertion,
//! legalization, and emission. A function that fails to legalize is
//! abandoned; its partial bytes are discarded with the throwaway encoder.

use crate::abi::CallConv;
use crate::binemit::{CpuSymbol, SymbolReloc};
use crate::error::CodegenResult;
use crate::ir::{DataSegment, MicroBuilder};
use crate::isa::x64::X64Encoder;
use crate::passes::branch_fold::BranchFolding;
use crate::passes::const_prop::ConstantPropagation;
use crate::passes::emit::Emit;
use crate::passes::legalize::Legalize;
use crate::passes::peephole::Peephole;
use crate::passes::prolog::PrologEpilog;
use crate::passes::regalloc::RegisterAllocation;
use crate::passes::store_forward::LoadStoreForwarding;
use crate::passes::{FrameInfo, PassContext, PassManager};
use crate::settings::{Flags, OptLevel};

/// The artifacts of one compiled function.
pub struct CompiledCode {
    /// The function's text bytes.
    pub bytes: Vec<u8>,
    /// Length of `bytes`.
    pub code_size: u32,
    /// The symbol table referenced by the relocations.
    pub symbols: Vec<CpuSymbol>,
    /// Relocations laid out as COFF expects, offsets relative to the
    /// start of `bytes`.
    pub code_relocations: Vec<SymbolReloc>,
}

/// Drives compilation of functions against one module's data segment.
pub struct Context {
    pub flags: Flags,
    pub data: DataSegment,
}

impl Context {
    pub fn new(flags: Flags) -> Self {
        CallConv::setup();
        Context {
            flags,
            data: DataSegment::new(),
        }
    }

    /// Run the pass pipeline over `builder` and return the function's
    /// machine code.
    pub fn compile(
        &mut self,
        builder: &mut MicroBuilder,
        func_name: &str,
    ) -> CodegenResult<CompiledCode> {
        let mut encoder = X64Encoder::new(self.flags.opt_level);

        let mut manager = PassManager::new();
        if self.flags.opt_level >= OptLevel::O1 {
            manager.add(ConstantPropagation);
            manager.add(BranchFolding);
            manager.add(LoadStoreForwarding);
            manager.add(Peephole);
        }
        manager.add(RegisterAllocation);
        manager.add(PrologEpilog);
        manager.add(Legalize);
        manager.add(Emit);

        let jump_tables = builder.jump_tables().to_vec();
        let symbol_names = builder.symbol_names().to_vec();
        let mut ctx = PassContext {
            insts: &mut builder.insts,
            operands: &mut builder.operands,
            encoder: &mut encoder,
            data: &mut self.data,
            call_conv: self.flags.call_conv,
            preserve_persistent_regs: self.flags.preserve_persistent_regs,
            frame: FrameInfo::default(),
            jump_tables: &jump_tables,
            symbol_names: &symbol_names,
            func_name,
        };
        manager.run_passes(&mut ctx)?;

        let bytes = encoder.buf.data().to_vec();
        let code_size = bytes.len() as u32;
        log::debug!("compiled `{func_name}`: {code_size} bytes");
        Ok(CompiledCode {
            bytes,
            code_size,
            symbols: encoder.symbols().to_vec(),
            code_relocations: encoder.relocations().to_vec(),
        })
    }
}
