//! x64 physical registers.
//!
//! The IR uses *logical* integer register indices (rax, rbx, rcx, rdx,
//! rsp, rbp, rsi, rdi, r8..r15 in that order); this module owns the
//! mapping to hardware ModRM encodings, where rcx is 1, rdx is 2, and rbx
//! is 3.

use crate::ir::reg::Reg;

pub fn rax() -> Reg {
    Reg::int(0)
}
pub fn rbx() -> Reg {
    Reg::int(1)
}
pub fn rcx() -> Reg {
    Reg::int(2)
}
pub fn rdx() -> Reg {
    Reg::int(3)
}
pub fn rsp() -> Reg {
    Reg::int(4)
}
pub fn rbp() -> Reg {
    Reg::int(5)
}
pub fn rsi() -> Reg {
    Reg::int(6)
}
pub fn rdi() -> Reg {
    Reg::int(7)
}

/// r8..r15 by number.
pub fn gpr(num: u32) -> Reg {
    debug_assert!((8..16).contains(&num));
    Reg::int(num)
}

pub fn r8() -> Reg {
    gpr(8)
}
pub fn r9() -> Reg {
    gpr(9)
}
pub fn r10() -> Reg {
    gpr(10)
}
pub fn r11() -> Reg {
    gpr(11)
}
pub fn r12() -> Reg {
    gpr(12)
}
pub fn r13() -> Reg {
    gpr(13)
}
pub fn r14() -> Reg {
    gpr(14)
}
pub fn r15() -> Reg {
    gpr(15)
}

pub fn xmm(num: u32) -> Reg {
    debug_assert!(num < 16);
    Reg::float(num)
}

/// The hardware encoding (0..15) of a physical register.
pub fn enc(reg: Reg) -> u8 {
    if reg.is_float() {
        return reg.index() as u8;
    }
    debug_assert!(reg.is_int(), "hardware encoding of {reg:?}");
    match reg.index() {
        0 => 0,  // rax
        1 => 3,  // rbx
        2 => 1,  // rcx
        3 => 2,  // rdx
        n @ 4..=15 => n as u8,
        n => unreachable!("integer register index {n}"),
    }
}

/// Is this an extended GPR (r8..r15) or high XMM needing a REX bit?
pub fn is_extended(reg: Reg) -> bool {
    (reg.is_int() || reg.is_float()) && enc(reg) >= 8
}

/// Byte-register access to rsp/rbp/rsi/rdi needs a REX prefix to select
/// spl/bpl/sil/dil instead of ah/ch/dh/bh.
pub fn needs_rex_for_byte(reg: Reg) -> bool {
    reg.is_int() && matches!(enc(reg), 4..=7)
}
