//! Golden byte sequences for the x64 encoder.

use crate::ir::condcodes::Cond;
use crate::ir::data::DataSegment;
use crate::ir::ops::{AluOp, OpBits};
use crate::isa::x64::regs::*;
use crate::isa::x64::{EmitFlags, EncodeResult, X64Encoder};
use crate::settings::OptLevel;

fn check(expected: &[u8], desc: &str, f: impl FnOnce(&mut X64Encoder)) {
    let mut enc = X64Encoder::new(OptLevel::O2);
    f(&mut enc);
    assert_eq!(enc.buf.data(), expected, "{desc}");
}

fn check_o0(expected: &[u8], desc: &str, f: impl FnOnce(&mut X64Encoder)) {
    let mut enc = X64Encoder::new(OptLevel::O0);
    f(&mut enc);
    assert_eq!(enc.buf.data(), expected, "{desc}");
}

const N: EmitFlags = EmitFlags::NONE;

#[test]
fn moves_reg_reg() {
    check(&[0x48, 0x89, 0xC3], "mov rbx, rax", |e| {
        e.encode_load_reg_reg(rbx(), rax(), OpBits::B64, N);
    });
    check(&[0x89, 0xD1], "mov ecx, edx", |e| {
        e.encode_load_reg_reg(rcx(), rdx(), OpBits::B32, N);
    });
    check(&[0x4D, 0x89, 0xC1], "mov r9, r8", |e| {
        e.encode_load_reg_reg(r9(), r8(), OpBits::B64, N);
    });
    check(&[0x88, 0xD8], "mov al, bl", |e| {
        e.encode_load_reg_reg(rax(), rbx(), OpBits::B8, N);
    });
    check(&[0x40, 0x88, 0xC6], "mov sil, al needs REX", |e| {
        e.encode_load_reg_reg(rsi(), rax(), OpBits::B8, N);
    });
    check(&[0x66, 0x89, 0xD8], "mov bx, ax", |e| {
        e.encode_load_reg_reg(rbx(), rax(), OpBits::B16, N);
    });
}

#[test]
fn moves_reg_imm() {
    check(
        &[0x48, 0xB8, 0x11, 0, 0, 0, 0, 0, 0, 0],
        "movabs rax, 0x11",
        |e| {
            e.encode_load_reg_imm(rax(), 0x11, OpBits::B64, N);
        },
    );
    check(&[0xB8, 0x11, 0, 0, 0], "mov eax, 0x11", |e| {
        e.encode_load_reg_imm(rax(), 0x11, OpBits::B32, N);
    });
    check(&[0xB0, 0x05], "mov al, 5", |e| {
        e.encode_load_reg_imm(rax(), 5, OpBits::B8, N);
    });
    check(&[0x41, 0xB9, 0xFF, 0, 0, 0], "mov r9d, 255", |e| {
        e.encode_load_reg_imm(r9(), 0xFF, OpBits::B32, N);
    });
}

#[test]
fn float_imm_probe_wants_constant_synthesis() {
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_load_reg_imm(xmm(0), 0, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::Right2Cst
    );
}

#[test]
fn moves_reg_mem() {
    check(&[0x48, 0x8B, 0x45, 0x08], "mov rax, [rbp+8]", |e| {
        e.encode_load_reg_mem(rax(), rbp(), 8, OpBits::B64, N);
    });
    check(&[0x48, 0x89, 0x4C, 0x24, 0x10], "mov [rsp+16], rcx", |e| {
        e.encode_load_mem_reg(rsp(), 0x10, rcx(), OpBits::B64, N);
    });
    check(&[0x49, 0x8B, 0x45, 0x00], "mov rax, [r13] forces disp8", |e| {
        e.encode_load_reg_mem(rax(), r13(), 0, OpBits::B64, N);
    });
    check(&[0x49, 0x8B, 0x04, 0x24], "mov rax, [r12] forces SIB", |e| {
        e.encode_load_reg_mem(rax(), r12(), 0, OpBits::B64, N);
    });
    check(
        &[0x48, 0x8B, 0x83, 0x00, 0x01, 0x00, 0x00],
        "mov rax, [rbx+256] disp32",
        |e| {
            e.encode_load_reg_mem(rax(), rbx(), 0x100, OpBits::B64, N);
        },
    );
    check(
        &[0xC7, 0x02, 0x01, 0x00, 0x00, 0x00],
        "mov dword [rdx], 1",
        |e| {
            e.encode_load_mem_imm(rdx(), 0, 1, OpBits::B32, N);
        },
    );
    check(
        &[0x48, 0xC7, 0x42, 0x08, 0xFE, 0xFF, 0xFF, 0xFF],
        "mov qword [rdx+8], -2",
        |e| {
            e.encode_load_mem_imm(rdx(), 8, (-2i64) as u64, OpBits::B64, N);
        },
    );
}

#[test]
fn mem_imm_probe_hints() {
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_load_mem_imm(rdx(), 0, 0x1_0000_0000, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::Right2Reg
    );
    assert_eq!(
        e.encode_load_mem_imm(rdx(), 0, 1, OpBits::B128, EmitFlags::CAN_ENCODE),
        EncodeResult::Right2Reg
    );
    assert_eq!(
        e.encode_load_mem_imm(rdx(), 0x8000_0000, 1, OpBits::B32, EmitFlags::CAN_ENCODE),
        EncodeResult::NotSupported
    );
}

#[test]
fn extensions() {
    check(&[0x0F, 0xB6, 0xC3], "movzx eax, bl", |e| {
        e.encode_load_zero_ext_reg_reg(rax(), rbx(), OpBits::B32, OpBits::B8, N);
    });
    check(&[0x48, 0x0F, 0xB7, 0xC1], "movzx rax, cx", |e| {
        e.encode_load_zero_ext_reg_reg(rax(), rcx(), OpBits::B64, OpBits::B16, N);
    });
    check(&[0x89, 0xC0], "mov eax, eax zero-extends to 64", |e| {
        e.encode_load_zero_ext_reg_reg(rax(), rax(), OpBits::B64, OpBits::B32, N);
    });
    check(&[0x48, 0x0F, 0xBE, 0xC3], "movsx rax, bl", |e| {
        e.encode_load_signed_ext_reg_reg(rax(), rbx(), OpBits::B64, OpBits::B8, N);
    });
    check(&[0x48, 0x63, 0xC0], "movsxd rax, eax", |e| {
        e.encode_load_signed_ext_reg_reg(rax(), rax(), OpBits::B64, OpBits::B32, N);
    });
    check(&[0x0F, 0xBE, 0x43, 0x04], "movsx eax, byte [rbx+4]", |e| {
        e.encode_load_signed_ext_reg_mem(rax(), rbx(), 4, OpBits::B32, OpBits::B8, N);
    });
}

#[test]
fn address_loads() {
    check(&[0x48, 0x8D, 0x42, 0x08], "lea rax, [rdx+8]", |e| {
        e.encode_load_addr_reg_mem(rax(), rdx(), 8, OpBits::B64, N);
    });
    check(&[0x48, 0x89, 0xD0], "lea with zero offset is a move", |e| {
        e.encode_load_addr_reg_mem(rax(), rdx(), 0, OpBits::B64, N);
    });
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_load_addr_reg_mem(rax(), rdx(), 8, OpBits::B32, EmitFlags::CAN_ENCODE),
        EncodeResult::NotSupported
    );
}

#[test]
fn scaled_indexed_addressing() {
    check(&[0x48, 0x8B, 0x44, 0x8A, 0x08], "mov rax, [rdx+rcx*4+8]", |e| {
        e.encode_load_amc_reg_mem(rax(), rdx(), rcx(), 4, 8, OpBits::B64, OpBits::B64, N);
    });
    check(&[0x48, 0x8D, 0x0C, 0xC8], "lea rcx, [rax+rcx*8]", |e| {
        e.encode_load_addr_amc_reg_mem(rcx(), rax(), rcx(), 8, 0, OpBits::B64, OpBits::B64, N);
    });
    check(
        &[0x48, 0x89, 0x04, 0x4D, 0x10, 0x00, 0x00, 0x00],
        "mov [rcx*2+16], rax without base",
        |e| {
            e.encode_load_amc_mem_reg(
                crate::ir::Reg::NO_BASE,
                rcx(),
                2,
                0x10,
                OpBits::B64,
                rax(),
                OpBits::B64,
                N,
            );
        },
    );
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_load_amc_reg_mem(rax(), rdx(), rcx(), 3, 0, OpBits::B64, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::NotSupported,
        "scale 3 is not encodable"
    );
    assert_eq!(
        e.encode_load_amc_reg_mem(rax(), rdx(), rsp(), 2, 0, OpBits::B64, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::NotSupported,
        "rsp index only with scale 1"
    );
}

#[test]
fn alu_reg_reg() {
    check(&[0x48, 0x01, 0xD8], "add rax, rbx", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Add, OpBits::B64, N);
    });
    check(&[0x29, 0xC8], "sub eax, ecx", |e| {
        e.encode_op_binary_reg_reg(rax(), rcx(), AluOp::Sub, OpBits::B32, N);
    });
    check(&[0x48, 0x31, 0xD2], "xor rdx, rdx", |e| {
        e.encode_op_binary_reg_reg(rdx(), rdx(), AluOp::Xor, OpBits::B64, N);
    });
    check(&[0x48, 0x0F, 0xAF, 0xC3], "imul rax, rbx", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Smul, OpBits::B64, N);
    });
    // The 8-bit form does not exist: both operands are sign-extended to 32
    // bits first and the result is read back as the low byte.
    check(
        &[0x0F, 0xBE, 0xC0, 0x0F, 0xBE, 0xDB, 0x0F, 0xAF, 0xC3],
        "imul al, bl widens through movsx",
        |e| {
            e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Smul, OpBits::B8, N);
        },
    );
    check(&[0x48, 0x87, 0xD8], "xchg rax, rbx", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Xchg, OpBits::B64, N);
    });
}

#[test]
fn alu_imm_ladder() {
    check(&[0x83, 0xC0, 0x05], "add eax, 5 via imm8", |e| {
        e.encode_op_binary_reg_imm(rax(), 5, AluOp::Add, OpBits::B32, N);
    });
    check(
        &[0x48, 0x81, 0xC1, 0x80, 0x00, 0x00, 0x00],
        "add rcx, 0x80 via imm32",
        |e| {
            e.encode_op_binary_reg_imm(rcx(), 0x80, AluOp::Add, OpBits::B64, N);
        },
    );
    check(&[0xFF, 0xC0], "add eax, 1 becomes inc at O1+", |e| {
        e.encode_op_binary_reg_imm(rax(), 1, AluOp::Add, OpBits::B32, N);
    });
    check_o0(&[0x83, 0xC0, 0x01], "add eax, 1 stays add at O0", |e| {
        e.encode_op_binary_reg_imm(rax(), 1, AluOp::Add, OpBits::B32, N);
    });
    check(&[0xFF, 0xC8], "sub eax, 1 becomes dec at O1+", |e| {
        e.encode_op_binary_reg_imm(rax(), 1, AluOp::Sub, OpBits::B32, N);
    });
    check(
        &[0x80, 0xE3, 0x0F],
        "and bl, 15 uses the byte group",
        |e| {
            e.encode_op_binary_reg_imm(rbx(), 0xF, AluOp::And, OpBits::B8, N);
        },
    );
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_op_binary_reg_imm(rax(), 0x1_0000_0000, AluOp::Add, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::Right2Reg
    );
}

#[test]
fn shifts() {
    check(&[0x48, 0xD1, 0xE0], "shl rax, 1", |e| {
        e.encode_op_binary_reg_imm(rax(), 1, AluOp::Shl, OpBits::B64, N);
    });
    check(&[0x48, 0xC1, 0xE0, 0x05], "shl rax, 5", |e| {
        e.encode_op_binary_reg_imm(rax(), 5, AluOp::Shl, OpBits::B64, N);
    });
    check(&[0x48, 0xD3, 0xE0], "shl rax, cl", |e| {
        e.encode_op_binary_reg_reg(rax(), rcx(), AluOp::Shl, OpBits::B64, N);
    });
    check(&[0xD1, 0xF8], "sar eax, 1", |e| {
        e.encode_op_binary_reg_imm(rax(), 1, AluOp::Sar, OpBits::B32, N);
    });
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Shl, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::Right2Rcx,
        "shift count must be in rcx"
    );
}

#[test]
fn div_family() {
    // udiv rax, rbx: xor edx, edx; div rbx.
    check(&[0x48, 0x31, 0xD2, 0x48, 0xF7, 0xF3], "div rbx (64)", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Udiv, OpBits::B64, N);
    });
    // sdiv eax, ecx: cdq; idiv ecx.
    check(&[0x99, 0xF7, 0xF9], "idiv ecx (32)", |e| {
        e.encode_op_binary_reg_reg(rax(), rcx(), AluOp::Sdiv, OpBits::B32, N);
    });
    // 8-bit signed division pre-extends AL.
    check(&[0x0F, 0xBE, 0xC0, 0xF6, 0xFB], "idiv bl pre-extends al", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Sdiv, OpBits::B8, N);
    });
    // 8-bit unsigned remainder: movzx, div, then ah -> al.
    check(
        &[0x0F, 0xB6, 0xC0, 0xF6, 0xF3, 0xC1, 0xE8, 0x08],
        "urem bl shifts the remainder out of ah",
        |e| {
            e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Urem, OpBits::B8, N);
        },
    );
    let mut e = X64Encoder::new(OptLevel::O2);
    assert_eq!(
        e.encode_op_binary_reg_reg(rbx(), rcx(), AluOp::Udiv, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::Left2Rax
    );
    assert_eq!(
        e.encode_op_binary_reg_reg(rax(), rdx(), AluOp::Udiv, OpBits::B64, EmitFlags::CAN_ENCODE),
        EncodeResult::NotSupported,
        "rdx divisor collides with the implicit pair"
    );
}

#[test]
fn bit_queries() {
    check(&[0x48, 0x0F, 0xBC, 0xC3], "bsf rax, rbx", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Bsf, OpBits::B64, N);
    });
    check(&[0xF3, 0x0F, 0xB8, 0xC3], "popcnt eax, ebx", |e| {
        e.encode_op_binary_reg_reg(rax(), rbx(), AluOp::Popcnt, OpBits::B32, N);
    });
    let mut e = X64Encoder::new(OptLevel::O2);
    for op in [AluOp::Bsf, AluOp::Bsr, AluOp::Popcnt] {
        assert_eq!(
            e.encode_op_binary_reg_reg(rax(), rbx(), op, OpBits::B8, EmitFlags::CAN_ENCODE),
            EncodeResult::ForceZero32,
            "{op:?} has no 8-bit form"
        );
    }
}

#[test]
fn unary_ops() {
    check(&[0x48, 0xF7, 0xD0], "not rax", |e| {
        e.encode_op_unary_reg(rax(), AluOp::Not, OpBits::B64, N);
    });
    check(&[0xF7, 0xDB], "neg ebx", |e| {
        e.encode_op_unary_reg(rbx(), AluOp::Neg, OpBits::B32, N);
    });
    check(&[0x0F, 0xC8], "bswap eax", |e| {
        e.encode_op_unary_reg(rax(), AluOp::Bswap, OpBits::B32, N);
    });
    check(&[0x49, 0x0F, 0xC9], "bswap r9", |e| {
        e.encode_op_unary_reg(r9(), AluOp::Bswap, OpBits::B64, N);
    });
    check(&[0x66, 0xC1, 0xC0, 0x08], "bswap ax is rol ax, 8", |e| {
        e.encode_op_unary_reg(rax(), AluOp::Bswap, OpBits::B16, N);
    });
    check(&[0x48, 0xF7, 0x53, 0x04], "not qword [rbx+4]", |e| {
        e.encode_op_unary_mem(rbx(), 4, AluOp::Not, OpBits::B64, N);
    });
}

#[test]
fn compares_and_conditionals() {
    check(&[0x48, 0x39, 0xD8], "cmp rax, rbx", |e| {
        e.encode_cmp_reg_reg(rax(), rbx(), OpBits::B64, N);
    });
    check(&[0x83, 0xF8, 0x0A], "cmp eax, 10", |e| {
        e.encode_cmp_reg_imm(rax(), 10, OpBits::B32, N);
    });
    check(&[0x48, 0x85, 0xFF], "test rdi, rdi", |e| {
        e.encode_cmp_reg_zero(rdi(), OpBits::B64, N);
    });
    check(&[0x39, 0x4B, 0x08], "cmp [rbx+8], ecx", |e| {
        e.encode_cmp_mem_reg(rbx(), 8, rcx(), OpBits::B32, N);
    });
    check(&[0x0F, 0x94, 0xC0], "sete al", |e| {
        e.encode_set_cond_reg(rax(), Cond::Equal, N);
    });
    check(&[0x40, 0x0F, 0x9C, 0xC6], "setl sil needs REX", |e| {
        e.encode_set_cond_reg(rsi(), Cond::Less, N);
    });
    check(&[0x48, 0x0F, 0x44, 0xC3], "cmove rax, rbx", |e| {
        e.encode_load_cond_reg_reg(rax(), rbx(), Cond::Equal, OpBits::B64, N);
    });
    check(&[0x0F, 0x47, 0xC3], "cmova widens to 32 bits", |e| {
        e.encode_load_cond_reg_reg(rax(), rbx(), Cond::Above, OpBits::B16, N);
    });
    check(&[0x0F, 0x2F, 0xC1], "comiss xmm0, xmm1", |e| {
        // No prefix for single precision.
        let r = e.encode_cmp_reg_reg(xmm(0), xmm(1), OpBits::B32, N);
        assert_eq!(r, EncodeResult::Zero);
    });
}

#[test]
fn float_moves_and_arith() {
    check(&[0xF3, 0x0F, 0x10, 0xC1], "movss xmm0, xmm1", |e| {
        e.encode_load_reg_reg(xmm(0), xmm(1), OpBits::B32, N);
    });
    check(&[0xF2, 0x0F, 0x10, 0xC1], "movsd xmm0, xmm1", |e| {
        e.encode_load_reg_reg(xmm(0), xmm(1), OpBits::B64, N);
    });
    check(&[0x66, 0x48, 0x0F, 0x6E, 0xC0], "movq xmm0, rax", |e| {
        e.encode_load_reg_reg(xmm(0), rax(), OpBits::B64, N);
    });
    check(&[0x66, 0x0F, 0x7E, 0xC8], "movd eax, xmm1", |e| {
        e.encode_load_reg_reg(rax(), xmm(1), OpBits::B32, N);
    });
    check(&[0xF3, 0x0F, 0x58, 0xC1], "addss xmm0, xmm1", |e| {
        e.encode_op_binary_reg_reg(xmm(0), xmm(1), AluOp::Fadd, OpBits::B32, N);
    });
    check(&[0xF2, 0x0F, 0x5E, 0xC1], "divsd xmm0, xmm1", |e| {
        e.encode_op_binary_reg_reg(xmm(0), xmm(1), AluOp::Fdiv, OpBits::B64, N);
    });
    check(&[0x66, 0x0F, 0x57, 0xC1], "xorpd xmm0, xmm1", |e| {
        e.encode_op_binary_reg_reg(xmm(0), xmm(1), AluOp::Fxor, OpBits::B64, N);
    });
    check(&[0x0F, 0x57, 0xC0], "clear xmm0 via xorps", |e| {
        e.encode_clear_reg(xmm(0), OpBits::B32, N);
    });
    check(&[0xF3, 0x48, 0x0F, 0x2A, 0xC0], "cvtsi2ss xmm0, rax", |e| {
        e.encode_op_binary_reg_reg(xmm(0), rax(), AluOp::IntToFloat, OpBits::B32, N);
    });
    check(&[0xF2, 0x48, 0x0F, 0x2C, 0xC1], "cvttsd2si rax, xmm1", |e| {
        e.encode_op_binary_reg_reg(rax(), xmm(1), AluOp::FloatToInt, OpBits::B64, N);
    });
}

#[test]
fn stack_ops() {
    check(&[0x55], "push rbp", |e| e.encode_push(rbp()));
    check(&[0x41, 0x54], "push r12", |e| e.encode_push(r12()));
    check(&[0x5D], "pop rbp", |e| e.encode_pop(rbp()));
    check(&[0xC3], "ret", |e| e.encode_ret());
    check(&[0x90], "nop", |e| e.encode_nop());
}

#[test]
fn jumps_and_patching() {
    // Backward short jump to own start: displacement -2.
    check(&[0x74, 0xFE], "jz .-2", |e| {
        let fixup = e.encode_jump(Cond::Equal, OpBits::B8);
        e.encode_patch_jump(&fixup, 0);
    });
    check(&[0xEB, 0x00], "jmp short to next", |e| {
        let fixup = e.encode_jump(Cond::Unconditional, OpBits::B8);
        e.encode_patch_jump_here(&fixup);
    });
    check(&[0x0F, 0x84, 0x00, 0x00, 0x00, 0x00], "jz near to next", |e| {
        let fixup = e.encode_jump(Cond::Equal, OpBits::B32);
        e.encode_patch_jump_here(&fixup);
    });
    check(&[0xE9, 0xFB, 0xFF, 0xFF, 0xFF], "jmp near back to start", |e| {
        let fixup = e.encode_jump(Cond::Unconditional, OpBits::B32);
        e.encode_patch_jump(&fixup, 0);
    });
    check(&[0xFF, 0xE0], "jmp rax", |e| e.encode_jump_reg(rax()));
}

#[test]
fn patch_at_own_site_is_identity() {
    // Patching a jump emitted at exactly (buffer end - width) to the
    // buffer end writes a zero displacement, the same as the reserved
    // bytes.
    let mut e = X64Encoder::new(OptLevel::O2);
    let fixup = e.encode_jump(Cond::NotEqual, OpBits::B32);
    let before = e.buf.data().to_vec();
    let end = e.cur_offset() as u64;
    e.encode_patch_jump(&fixup, end);
    assert_eq!(e.buf.data(), &before[..]);
}

#[test]
#[should_panic(expected = "short jump displacement out of range")]
fn short_jump_out_of_range_panics() {
    let mut e = X64Encoder::new(OptLevel::O2);
    let fixup = e.encode_jump(Cond::Equal, OpBits::B8);
    e.encode_patch_jump(&fixup, 0x1000);
}

#[test]
fn calls_and_relocations() {
    use crate::binemit::{CpuSymbolKind, Reloc};

    let mut e = X64Encoder::new(OptLevel::O2);
    e.encode_call_extern("memcpy");
    assert_eq!(e.buf.data(), &[0xFF, 0x15, 0, 0, 0, 0]);
    assert_eq!(e.relocations().len(), 1);
    assert_eq!(e.relocations()[0].offset_in_text, 2);
    assert_eq!(e.relocations()[0].kind, Reloc::Rel32);
    assert_eq!(e.symbols()[0].kind, CpuSymbolKind::Extern);

    // A call to an unresolved local symbol records a relocation.
    let mut e = X64Encoder::new(OptLevel::O2);
    e.encode_call_local("helper");
    assert_eq!(e.buf.data(), &[0xE8, 0, 0, 0, 0]);
    assert_eq!(e.relocations().len(), 1);

    // A call to a resolved function is encoded in place, backward.
    let mut e = X64Encoder::new(OptLevel::O2);
    e.begin_function("helper");
    e.encode_ret();
    e.begin_function("caller");
    e.encode_call_local("helper");
    assert!(e.relocations().is_empty());
    // call at offset 1, next inst at 6, target 0 -> displacement -6.
    assert_eq!(&e.buf.data()[1..], &[0xE8, 0xFA, 0xFF, 0xFF, 0xFF]);

    let mut e = X64Encoder::new(OptLevel::O2);
    e.encode_call_reg(rax());
    assert_eq!(e.buf.data(), &[0xFF, 0xD0]);
}

#[test]
fn symbol_relative_loads() {
    use crate::binemit::Reloc;

    let mut e = X64Encoder::new(OptLevel::O2);
    let sym = e.get_or_add_symbol("rodata", crate::binemit::CpuSymbolKind::Constants);
    e.encode_load_sym_reloc_addr(rax(), sym, 0x20);
    // lea rax, [rip + rodata + 0x20]
    assert_eq!(e.buf.data(), &[0x48, 0x8D, 0x05, 0x20, 0, 0, 0]);
    assert_eq!(e.relocations()[0].kind, Reloc::Rel32);
    assert_eq!(e.relocations()[0].offset_in_text, 3);

    let mut e = X64Encoder::new(OptLevel::O2);
    let sym = e.get_or_add_symbol("rodata", crate::binemit::CpuSymbolKind::Constants);
    e.encode_load_sym_reloc_value(rax(), sym, 0x40, OpBits::B64, EmitFlags::B64);
    // movabs rax, <addr64>
    assert_eq!(
        e.buf.data(),
        &[0x48, 0xB8, 0x40, 0, 0, 0, 0, 0, 0, 0]
    );
    assert_eq!(e.relocations()[0].kind, Reloc::Addr64);
}

#[test]
fn jump_table_dispatch_sequence() {
    let mut e = X64Encoder::new(OptLevel::O2);
    let mut data = DataSegment::new();
    let const_sym = e.get_or_add_symbol("rodata", crate::binemit::CpuSymbolKind::Constants);
    let fn_sym = e.begin_function("f");
    let (table_off, seq_end) = e.encode_jump_table(r10(), r11(), 3, &mut data, const_sym, fn_sym);

    assert_eq!(table_off, 0);
    assert_eq!(data.len(), 12);
    assert_eq!(seq_end, e.cur_offset());
    // lea, movsxd, lea, add, jmp: two REL32 relocations.
    assert_eq!(e.relocations().len(), 2);
    // The second relocation's addend points at the end of the sequence.
    let addend = e.buf.read4(e.relocations()[1].offset_in_text);
    assert_eq!(addend, seq_end);
}

#[test]
fn atomic_forms() {
    check(&[0xF0, 0x48, 0x0F, 0xB1, 0x0B], "lock cmpxchg [rbx], rcx", |e| {
        e.encode_op_ternary_reg_reg_reg(
            rax(),
            rbx(),
            rcx(),
            AluOp::Cmpxchg,
            OpBits::B64,
            EmitFlags::LOCK,
        );
    });
    check(&[0xF0, 0x48, 0x01, 0x03], "lock add [rbx], rax", |e| {
        e.encode_op_binary_mem_reg(rbx(), 0, rax(), AluOp::Add, OpBits::B64, EmitFlags::LOCK);
    });
}

#[test]
fn fmuladd_expands_to_two_ops() {
    check(
        &[0xF3, 0x0F, 0x59, 0xC1, 0xF3, 0x0F, 0x58, 0xC2],
        "fmuladd xmm0, xmm1, xmm2 (single)",
        |e| {
            e.encode_op_ternary_reg_reg_reg(xmm(0), xmm(1), xmm(2), AluOp::Fmuladd, OpBits::B32, N);
        },
    );
}
