//! The Micro-IR: a linear, register/memory three-operand representation
//! with an explicit use-def model and flag liveness.

pub mod builder;
pub mod condcodes;
pub mod data;
pub mod info;
pub mod instructions;
pub mod ops;
pub mod reg;
pub mod storage;

pub use self::builder::{JumpTableData, Label, MicroBuilder, SymbolId};
pub use self::condcodes::Cond;
pub use self::data::DataSegment;
pub use self::instructions::{Inst, Opcode, Operand};
pub use self::ops::{AluOp, OpBits};
pub use self::reg::{Reg, RegClass};
pub use self::storage::{InstStorage, OperandPool};
