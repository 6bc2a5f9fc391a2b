//! Whole-pipeline tests: builder-produced Micro-IR through every pass to
//! machine code.

use ingot_codegen::abi::CallConvKind;
use ingot_codegen::binemit::Reloc;
use ingot_codegen::ir::{AluOp, Cond, JumpTableData, MicroBuilder, OpBits};
use ingot_codegen::settings::{Flags, OptLevel};
use ingot_codegen::Context;

fn flags(opt_level: OptLevel) -> Flags {
    Flags {
        opt_level,
        call_conv: CallConvKind::WindowsX64,
        preserve_persistent_regs: true,
    }
}

#[test]
fn trivial_function_compiles_to_aligned_frame() {
    let mut ctx = Context::new(flags(OptLevel::O2));
    let mut b = MicroBuilder::new();
    let v0 = b.alloc_virt_int();
    b.encode_load_reg_imm(v0, 42, OpBits::B64);
    b.encode_ret();

    let code = ctx.compile(&mut b, "answer").unwrap();
    assert!(code.code_size > 0);
    assert_eq!(code.bytes.len(), code.code_size as usize);
    // Prologue reserves the frame; the last byte is the return.
    assert_eq!(*code.bytes.last().unwrap(), 0xC3);
    // sub rsp, imm8 appears before the body.
    assert_eq!(&code.bytes[..3], &[0x48, 0x83, 0xEC]);
}

#[test]
fn folded_branch_becomes_unconditional() {
    let mut ctx = Context::new(flags(OptLevel::O2));
    let mut b = MicroBuilder::new();
    let v0 = b.alloc_virt_int();
    let target = b.create_label();
    b.encode_load_reg_imm(v0, 5, OpBits::B32);
    b.encode_cmp_reg_imm(v0, 5, OpBits::B32);
    b.encode_jump_cond(Cond::Zero, target);
    b.bind_label(target);
    b.encode_ret();

    let code = ctx.compile(&mut b, "fold").unwrap();
    // The compare never reaches the encoder: no 0x39/0x83-/7 compare
    // encodings, and the jump is the unconditional near form.
    assert!(code.bytes.contains(&0xE9) || code.bytes.contains(&0xEB));
    assert!(!code.bytes.windows(2).any(|w| w == [0x0F, 0x84]));
}

#[test]
fn store_load_pair_forwards_through_registers() {
    let mut ctx = Context::new(flags(OptLevel::O2));
    let mut b = MicroBuilder::new();
    let addr = b.alloc_virt_int();
    let value = b.alloc_virt_int();
    let out = b.alloc_virt_int();
    b.encode_load_reg_imm(addr, 0, OpBits::B64);
    b.encode_load_mem_reg(addr, 8, value, OpBits::B64);
    b.encode_load_reg_mem(out, addr, 8, OpBits::B64);
    b.encode_ret();

    // The second access must not be a load: 8B with a displacement
    // never appears (the store itself is 89).
    let code = ctx.compile(&mut b, "forward").unwrap();
    assert!(!code.bytes.contains(&0x8B));
}

#[test]
fn extern_call_records_rel32_relocation() {
    let mut ctx = Context::new(flags(OptLevel::O2));
    let mut b = MicroBuilder::new();
    b.encode_call_extern("memcpy");
    b.encode_ret();

    let code = ctx.compile(&mut b, "calls").unwrap();
    let reloc = code
        .code_relocations
        .iter()
        .find(|r| r.kind == Reloc::Rel32)
        .expect("extern call must produce a REL32 relocation");
    let sym = &code.symbols[reloc.symbol_index as usize];
    assert_eq!(sym.name, "memcpy");
    // The relocation payload is the addend, zero for calls.
    let site = reloc.offset_in_text as usize;
    assert_eq!(&code.bytes[site..site + 4], &[0, 0, 0, 0]);
}

#[test]
fn division_is_legalized_and_encoded() {
    let mut ctx = Context::new(flags(OptLevel::O0));
    let mut b = MicroBuilder::new();
    let lhs = b.alloc_virt_int();
    let rhs = b.alloc_virt_int();
    b.encode_load_reg_imm(lhs, 100, OpBits::B64);
    b.encode_load_reg_imm(rhs, 7, OpBits::B64);
    b.encode_op_binary_reg_reg(lhs, rhs, AluOp::Udiv, OpBits::B64);
    b.encode_ret();

    let code = ctx.compile(&mut b, "divide").unwrap();
    // div r/m64 is F7 /6; the pipeline must have produced one.
    assert!(code.bytes.windows(1).any(|w| w == [0xF7]));
}

#[test]
fn loop_with_backward_jump_compiles() {
    let mut ctx = Context::new(flags(OptLevel::O0));
    let mut b = MicroBuilder::new();
    let counter = b.alloc_virt_int();
    let top = b.create_label();
    b.encode_load_reg_imm(counter, 10, OpBits::B64);
    b.bind_label(top);
    b.encode_op_binary_reg_imm(counter, 1, AluOp::Sub, OpBits::B64);
    b.encode_cmp_reg_zero(counter, OpBits::B64);
    b.encode_jump_cond(Cond::NotZero, top);
    b.encode_ret();

    let code = ctx.compile(&mut b, "countdown").unwrap();
    assert_eq!(*code.bytes.last().unwrap(), 0xC3);
}

#[test]
fn jump_table_writes_entries_into_the_data_segment() {
    let mut ctx = Context::new(flags(OptLevel::O0));
    let mut b = MicroBuilder::new();
    let table = b.alloc_virt_int();
    let index = b.alloc_virt_int();
    let case0 = b.create_label();
    let case1 = b.create_label();
    b.encode_jump_table(
        table,
        index,
        JumpTableData {
            entries: vec![case0, case1],
        },
    );
    b.bind_label(case0);
    b.encode_ret();
    b.bind_label(case1);
    b.encode_ret();

    let code = ctx.compile(&mut b, "dispatch").unwrap();
    // Two REL32 relocations: the table address and the function base.
    let rel32s = code
        .code_relocations
        .iter()
        .filter(|r| r.kind == Reloc::Rel32)
        .count();
    assert_eq!(rel32s, 2);
    // Both entries were resolved; case0 sits right after the dispatch
    // sequence and case1 strictly after case0's teardown.
    assert_eq!(ctx.data.len(), 8);
    let e0 = ctx.data.read_u32(0) as i32;
    let e1 = ctx.data.read_u32(4) as i32;
    assert_eq!(e0, 0);
    assert!(e1 > e0);
}

#[test]
fn persistent_registers_are_saved_around_calls() {
    let mut ctx = Context::new(flags(OptLevel::O0));
    let mut b = MicroBuilder::new();
    let kept = b.alloc_virt_int();
    b.encode_load_reg_imm(kept, 7, OpBits::B64);
    b.encode_call_extern("other");
    b.encode_op_binary_reg_imm(kept, 1, AluOp::Add, OpBits::B64);
    b.encode_ret();

    let code = ctx.compile(&mut b, "keeper").unwrap();
    // A push of a callee-save register appears before the frame setup
    // and a matching pop before the return.
    let first = code.bytes[0];
    assert!(
        (0x50..=0x57).contains(&first) || first == 0x41,
        "expected a push, found {first:#x}"
    );
    let tail = &code.bytes[code.bytes.len().saturating_sub(3)..];
    assert!(tail.iter().any(|b| (0x58..=0x5F).contains(b)));
}

#[test]
fn o0_keeps_redundant_code_o2_removes_it() {
    let build = |opt| {
        let mut ctx = Context::new(flags(opt));
        let mut b = MicroBuilder::new();
        let v0 = b.alloc_virt_int();
        let v1 = b.alloc_virt_int();
        b.encode_load_reg_imm(v0, 42, OpBits::B64);
        b.encode_load_reg_reg(v1, v0, OpBits::B64);
        b.encode_op_binary_reg_reg(
            ingot_codegen::isa::x64::regs::rax(),
            v1,
            AluOp::Add,
            OpBits::B64,
        );
        b.encode_ret();
        ctx.compile(&mut b, "redundant").unwrap().code_size
    };
    assert!(build(OptLevel::O2) <= build(OptLevel::O0));
}
