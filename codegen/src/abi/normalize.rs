//! ABI type normalization.
//!
//! Turns a frontend-level type into the shape it takes when crossing a
//! call boundary under a given convention: a scalar of some width, a
//! float, or an indirect reference to caller-owned storage.

use crate::abi::{CallConv, StructPassingKind};

/// Where the value travels: as an argument or as a return value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Usage {
    Argument,
    Return,
}

/// The frontend-facing view of a type, already resolved through aliases
/// and enums by semantic analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiType {
    Void,
    Bool,
    /// A character rune (32-bit scalar).
    Rune,
    /// An integer of 1..=64 bits.
    Int { bits: u32 },
    /// A float of 32 or 64 bits.
    Float { bits: u32 },
    /// Pointers, references, slices-of-one-word, function values.
    Pointer,
    Null,
    /// An aggregate with a known size and alignment.
    Struct { size: u32, align: u32 },
}

/// The ABI-level passing shape of one value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizedType {
    pub is_void: bool,
    pub is_float: bool,
    pub num_bits: u8,
    /// Passed as a pointer to storage rather than in a register.
    pub is_indirect: bool,
    /// The caller must materialize a defensive copy of the pointee.
    pub needs_indirect_copy: bool,
    pub indirect_size: u32,
    pub indirect_align: u32,
}

impl NormalizedType {
    fn scalar(is_float: bool, num_bits: u8) -> Self {
        NormalizedType {
            is_float,
            num_bits,
            ..Default::default()
        }
    }

    fn void() -> Self {
        NormalizedType {
            is_void: true,
            ..Default::default()
        }
    }

    fn indirect_struct(size: u32, align: u32, needs_copy: bool) -> Self {
        NormalizedType {
            is_indirect: true,
            needs_indirect_copy: needs_copy,
            indirect_size: size,
            indirect_align: align,
            ..Self::scalar(false, 64)
        }
    }
}

/// Normalize `ty` for `usage` under `conv`.
pub fn normalize(conv: &CallConv, ty: AbiType, usage: Usage) -> NormalizedType {
    match ty {
        AbiType::Void => NormalizedType::void(),
        AbiType::Bool => NormalizedType::scalar(false, 8),
        AbiType::Rune => NormalizedType::scalar(false, 32),
        AbiType::Int { bits } => {
            assert!(bits >= 1 && bits <= 64, "integer width out of range: {bits}");
            NormalizedType::scalar(false, bits as u8)
        }
        AbiType::Float { bits } => {
            assert!(bits == 32 || bits == 64, "float width out of range: {bits}");
            NormalizedType::scalar(true, bits as u8)
        }
        AbiType::Pointer | AbiType::Null => NormalizedType::scalar(false, 64),
        AbiType::Struct { size, align } => {
            let passing = match usage {
                Usage::Argument => conv.classify_struct_arg_passing(size),
                Usage::Return => conv.classify_struct_return_passing(size),
            };
            match passing {
                StructPassingKind::ByValue => {
                    assert!(
                        size == 1 || size == 2 || size == 4 || size == 8,
                        "by-value struct of size {size}"
                    );
                    NormalizedType::scalar(false, (size * 8) as u8)
                }
                StructPassingKind::ByReference => {
                    let needs_copy = usage == Usage::Argument
                        && conv.struct_arg_passing.pass_by_reference_needs_copy;
                    NormalizedType::indirect_struct(size, align.max(1), needs_copy)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::CallConvKind;

    fn conv() -> &'static CallConv {
        CallConv::setup();
        CallConv::get(CallConvKind::WindowsX64)
    }

    #[test]
    fn scalars() {
        let c = conv();
        assert!(normalize(c, AbiType::Void, Usage::Return).is_void);
        assert_eq!(normalize(c, AbiType::Bool, Usage::Argument).num_bits, 8);
        assert_eq!(normalize(c, AbiType::Rune, Usage::Argument).num_bits, 32);
        let i17 = normalize(c, AbiType::Int { bits: 17 }, Usage::Argument);
        assert!(!i17.is_float);
        assert_eq!(i17.num_bits, 17);
        let f = normalize(c, AbiType::Float { bits: 64 }, Usage::Return);
        assert!(f.is_float);
        assert_eq!(f.num_bits, 64);
        assert_eq!(normalize(c, AbiType::Pointer, Usage::Argument).num_bits, 64);
        assert_eq!(normalize(c, AbiType::Null, Usage::Argument).num_bits, 64);
    }

    #[test]
    fn small_structs_pass_by_value() {
        let c = conv();
        for size in [1u32, 2, 4, 8] {
            let n = normalize(c, AbiType::Struct { size, align: size }, Usage::Argument);
            assert!(!n.is_indirect);
            assert_eq!(n.num_bits as u32, size * 8);
        }
    }

    #[test]
    fn large_structs_go_indirect_with_copy() {
        let c = conv();
        let arg = normalize(c, AbiType::Struct { size: 24, align: 8 }, Usage::Argument);
        assert!(arg.is_indirect);
        assert!(arg.needs_indirect_copy);
        assert_eq!(arg.num_bits, 64);
        assert_eq!(arg.indirect_size, 24);
        assert_eq!(arg.indirect_align, 8);

        let ret = normalize(c, AbiType::Struct { size: 24, align: 0 }, Usage::Return);
        assert!(ret.is_indirect);
        assert!(!ret.needs_indirect_copy);
        assert_eq!(ret.indirect_align, 1);
    }

    #[test]
    fn odd_small_struct_is_indirect() {
        let c = conv();
        let n = normalize(c, AbiType::Struct { size: 3, align: 1 }, Usage::Argument);
        assert!(n.is_indirect);
    }
}
