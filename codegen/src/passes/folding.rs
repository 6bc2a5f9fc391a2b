//! Shared helpers of the optimizing passes: immediate folding and the
//! encoder-conformance probe.

use crate::ir::instructions::{Inst, Opcode, Operand};
use crate::ir::ops::{AluOp, OpBits};
use crate::isa::x64::{EmitFlags, EncodeResult, X64Encoder};

/// Fold `lhs op rhs` at the given width. Returns `None` whenever the fold
/// could go wrong (division by zero, shift past the width, signed
/// overflow corner); the instruction is then left untouched.
pub fn fold_binary_immediate(lhs: u64, rhs: u64, op: AluOp, bits: OpBits) -> Option<u64> {
    let a = bits.normalize(lhs);
    let b = bits.normalize(rhs);
    let width = bits.bits() as u64;
    let value = match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::And => a & b,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
        AluOp::Umul => a.wrapping_mul(b),
        AluOp::Smul => {
            let x = bits.to_signed(lhs);
            let y = bits.to_signed(rhs);
            x.wrapping_mul(y) as u64
        }
        AluOp::Udiv => {
            if b == 0 {
                return None;
            }
            a / b
        }
        AluOp::Urem => {
            if b == 0 {
                return None;
            }
            a % b
        }
        AluOp::Sdiv | AluOp::Srem => {
            let x = bits.to_signed(lhs);
            let y = bits.to_signed(rhs);
            if y == 0 || (x == i64::MIN && y == -1) {
                return None;
            }
            if op == AluOp::Sdiv {
                (x / y) as u64
            } else {
                (x % y) as u64
            }
        }
        AluOp::Shl | AluOp::Sal => {
            if width == 0 || b >= width {
                return None;
            }
            a << b
        }
        AluOp::Shr => {
            if width == 0 || b >= width {
                return None;
            }
            a >> b
        }
        AluOp::Sar => {
            if width == 0 || b >= width {
                return None;
            }
            (bits.to_signed(lhs) >> b) as u64
        }
        AluOp::Rol | AluOp::Ror => {
            if width == 0 {
                return None;
            }
            let s = b % width;
            if s == 0 {
                a
            } else if op == AluOp::Rol {
                (a << s) | (a >> (width - s))
            } else {
                (a >> s) | (a << (width - s))
            }
        }
        _ => return None,
    };
    Some(bits.normalize(value))
}

/// Does the encoder refuse this instruction as written? Rewrites that
/// would produce a non-`Zero` probe must be rolled back; this is the
/// single place encoder constraints leak into the optimizer.
pub fn violates_encoder_conformance(encoder: &mut X64Encoder, inst: &Inst, ops: &[Operand]) -> bool {
    encoder.encode_inst(inst, ops, EmitFlags::CAN_ENCODE) != EncodeResult::Zero
}

/// Is this instruction a true no-op at the machine level?
///
/// Integer self-moves at 32 bits are *not* no-ops: they zero the upper
/// half of the destination.
pub fn is_no_op_instruction(inst: &Inst, ops: &[Operand]) -> bool {
    if inst.opcode != Opcode::LoadRegReg {
        return false;
    }
    let dst = ops[0].reg();
    let src = ops[1].reg();
    if dst != src {
        return false;
    }
    if dst.is_float_class() {
        return true;
    }
    ops[2].bits() != OpBits::B32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::reg::Reg;
    use ingot_entity::Ref;

    #[test]
    fn folds_respect_width() {
        assert_eq!(fold_binary_immediate(0xFF, 1, AluOp::Add, OpBits::B8), Some(0));
        assert_eq!(
            fold_binary_immediate(0x8000_0000, 0x8000_0000, AluOp::Add, OpBits::B32),
            Some(0)
        );
        assert_eq!(fold_binary_immediate(5, 3, AluOp::Sub, OpBits::B32), Some(2));
        assert_eq!(
            fold_binary_immediate(3, 5, AluOp::Sub, OpBits::B16),
            Some(0xFFFE)
        );
        assert_eq!(fold_binary_immediate(6, 3, AluOp::Smul, OpBits::B32), Some(18));
    }

    #[test]
    fn unsafe_folds_bail_out() {
        assert_eq!(fold_binary_immediate(5, 0, AluOp::Udiv, OpBits::B32), None);
        assert_eq!(fold_binary_immediate(5, 0, AluOp::Srem, OpBits::B64), None);
        assert_eq!(
            fold_binary_immediate(i64::MIN as u64, u64::MAX, AluOp::Sdiv, OpBits::B64),
            None
        );
        assert_eq!(fold_binary_immediate(1, 32, AluOp::Shl, OpBits::B32), None);
        assert_eq!(fold_binary_immediate(1, 31, AluOp::Shl, OpBits::B32), Some(0x8000_0000));
    }

    #[test]
    fn signed_shifts_and_rotates() {
        assert_eq!(
            fold_binary_immediate(0x80, 7, AluOp::Sar, OpBits::B8),
            Some(0xFF)
        );
        assert_eq!(
            fold_binary_immediate(0x81, 1, AluOp::Ror, OpBits::B8),
            Some(0xC0)
        );
        assert_eq!(
            fold_binary_immediate(0x81, 1, AluOp::Rol, OpBits::B8),
            Some(0x03)
        );
    }

    #[test]
    fn self_move_no_op_classification() {
        let inst = Inst {
            opcode: Opcode::LoadRegReg,
            num_operands: 3,
            operands: Ref::INVALID,
        };
        let same64 = [
            Operand::Reg(Reg::int(3)),
            Operand::Reg(Reg::int(3)),
            Operand::Bits(OpBits::B64),
        ];
        assert!(is_no_op_instruction(&inst, &same64));
        let same32 = [
            Operand::Reg(Reg::int(3)),
            Operand::Reg(Reg::int(3)),
            Operand::Bits(OpBits::B32),
        ];
        assert!(!is_no_op_instruction(&inst, &same32));
        let differ = [
            Operand::Reg(Reg::int(3)),
            Operand::Reg(Reg::int(4)),
            Operand::Bits(OpBits::B64),
        ];
        assert!(!is_no_op_instruction(&inst, &differ));
    }
}
