//! Machine-code generation for the Ingot compiler.
//!
//! This crate turns a function lowered into the linear Micro-IR into
//! executable Windows x64 machine code. The pipeline is a fixed sequence of
//! passes over one function's instruction storage:
//!
//! 1. constant propagation,
//! 2. branch folding,
//! 3. load/store forwarding,
//! 4. peephole rewriting (a rule engine over addressing, immediate, copy,
//!    and cleanup patterns),
//! 5. register allocation,
//! 6. prolog/epilog insertion,
//! 7. legalization against the encoder's capabilities,
//! 8. emission.
//!
//! The [`ir`] module defines the Micro-IR itself: registers, operands,
//! opcodes, and the paged instruction storage with stable references. The
//! [`abi`] module models calling conventions and the ABI shape of argument
//! and return types. The [`isa::x64`] module is the instruction encoder:
//! every encoding entry point can be driven in a probe mode that answers
//! "can this be encoded as-is?" with a legalization hint instead of bytes.
//!
//! Compilation of one function is owned by a [`Context`]: build Micro-IR
//! through a [`ir::MicroBuilder`], then call [`Context::compile`] to run the
//! pass pipeline and collect the bytes, symbols, and relocations.

#![allow(dead_code)]

pub mod abi;
pub mod binemit;
pub mod context;
pub mod error;
pub mod ir;
pub mod isa;
pub mod passes;
pub mod settings;

pub use crate::context::{CompiledCode, Context};
pub use crate::error::{CodegenError, CodegenResult};
