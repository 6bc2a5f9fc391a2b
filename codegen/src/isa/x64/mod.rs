//! The x64 instruction encoder.
//!
//! Every `encode_*` entry point can run in two modes. In probe mode
//! (`EmitFlags::CAN_ENCODE`) nothing is written; the return value is
//! [`EncodeResult::Zero`] when the operands are encodable as-is, or a hint
//! telling the legalizer which shape change would make them encodable. In
//! emit mode the exact byte sequence is appended to the buffer; calling an
//! emit-mode entry point with operands whose probe would not answer `Zero`
//! is a programmer error.

pub mod emit;
pub mod encoding;
pub mod regs;

#[cfg(test)]
mod emit_tests;

use crate::binemit::{CodeBuffer, CodeOffset, CpuSymbol, CpuSymbolKind, SymbolReloc};
use crate::settings::OptLevel;

/// Emission flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmitFlags(u8);

impl EmitFlags {
    pub const NONE: EmitFlags = EmitFlags(0);
    /// Probe only: answer encodability, write nothing.
    pub const CAN_ENCODE: EmitFlags = EmitFlags(1);
    /// Prefix the operation with `lock`.
    pub const LOCK: EmitFlags = EmitFlags(2);
    /// Select the 64-bit form of an operation whose width operand
    /// describes the other lane (int<->float conversions).
    pub const B64: EmitFlags = EmitFlags(4);
    /// The operation feeds an overflow check; keep flag-exact encodings.
    pub const OVERFLOW: EmitFlags = EmitFlags(8);

    pub fn has(self, other: EmitFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn with(self, other: EmitFlags) -> EmitFlags {
        EmitFlags(self.0 | other.0)
    }
}

/// The probe-mode verdict of an `encode_*` entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeResult {
    /// Encodable as-is.
    Zero,
    /// Move the left operand to RAX first.
    Left2Rax,
    /// Move the left operand to any scratch register first.
    Left2Reg,
    /// Materialize the right immediate into a register first.
    Right2Reg,
    /// Move the right operand to RCX first.
    Right2Rcx,
    /// The constant cannot be carried as an immediate at all; re-synthesize
    /// it through a register.
    Right2Cst,
    /// Widen the 8-bit form to 32 bits.
    ForceZero32,
    /// No legalization can make this encodable.
    NotSupported,
}

/// The x64 encoder: output buffer, symbol table, and relocations.
pub struct X64Encoder {
    pub buf: CodeBuffer,
    symbols: Vec<CpuSymbol>,
    relocations: Vec<SymbolReloc>,
    /// Start offset of the current function in the buffer.
    text_section_offset: CodeOffset,
    opt_level: OptLevel,
}

impl X64Encoder {
    pub fn new(opt_level: OptLevel) -> Self {
        X64Encoder {
            buf: CodeBuffer::new(),
            symbols: Vec::new(),
            relocations: Vec::new(),
            text_section_offset: 0,
            opt_level,
        }
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// Mark the start of a function at the current offset and define its
    /// symbol. Returns the symbol index.
    pub fn begin_function(&mut self, name: &str) -> u32 {
        self.text_section_offset = self.buf.cur_offset();
        let index = self.get_or_add_symbol(name, CpuSymbolKind::Function);
        self.symbols[index as usize].kind = CpuSymbolKind::Function;
        self.symbols[index as usize].value = self.text_section_offset as u64;
        index
    }

    /// Offset of the current function's first byte.
    pub fn function_start(&self) -> CodeOffset {
        self.text_section_offset
    }

    /// Bytes emitted so far for the whole buffer.
    pub fn cur_offset(&self) -> CodeOffset {
        self.buf.cur_offset()
    }

    /// Find or create a symbol by name. An existing symbol keeps its kind;
    /// a new one is created with `kind`.
    pub fn get_or_add_symbol(&mut self, name: &str, kind: CpuSymbolKind) -> u32 {
        if let Some(sym) = self.symbols.iter().find(|s| s.name == name) {
            return sym.index;
        }
        let index = self.symbols.len() as u32;
        self.symbols.push(CpuSymbol {
            name: name.to_string(),
            kind,
            value: 0,
            index,
        });
        index
    }

    pub fn symbols(&self) -> &[CpuSymbol] {
        &self.symbols
    }

    pub fn relocations(&self) -> &[SymbolReloc] {
        &self.relocations
    }

    pub(crate) fn add_symbol_relocation(&mut self, offset_in_text: CodeOffset, symbol_index: u32, kind: crate::binemit::Reloc) {
        self.relocations.push(SymbolReloc {
            offset_in_text,
            symbol_index,
            kind,
        });
    }
}
