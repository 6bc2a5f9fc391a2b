//! Calling conventions.
//!
//! A [`CallConv`] is an immutable record describing one convention:
//! register files, argument registers, transient (caller-save) and
//! persistent (callee-save) partitions, stack geometry, and the by-value
//! struct-passing masks. The table of conventions is process-wide,
//! populated exactly once by [`CallConv::setup`], and read-only afterward.

pub mod normalize;

pub use self::normalize::{AbiType, NormalizedType, Usage};

use crate::ir::reg::Reg;
use core::fmt;
use smallvec::SmallVec;
use std::sync::OnceLock;
use target_lexicon::{OperatingSystem, Triple};

/// Calling-convention identifiers. `Host` and `C` alias the concrete
/// convention of the build target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallConvKind {
    WindowsX64,
    C,
    Host,
}

const CALL_CONV_COUNT: usize = 3;

/// How a struct of a given size travels through a call boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StructPassingKind {
    ByValue,
    ByReference,
}

/// Struct-passing policy for one direction (argument or return).
#[derive(Clone, Debug, Default)]
pub struct StructPassing {
    /// Bit `n` set means a struct of exactly `n` bytes is passed by value.
    pub pass_by_value_size_mask: u64,
    /// By-value structs occupy integer argument slots.
    pub pass_by_value_in_int_slots: bool,
    /// By-reference arguments require a defensive caller-side copy.
    pub pass_by_reference_needs_copy: bool,
}

impl StructPassing {
    fn has_size_bit(&self, size_in_bytes: u32) -> bool {
        if size_in_bytes == 0 || size_in_bytes >= 64 {
            return false;
        }
        self.pass_by_value_size_mask & (1u64 << size_in_bytes) != 0
    }
}

/// One calling convention, fully describing register and stack usage.
#[derive(Clone, Debug, Default)]
pub struct CallConv {
    pub name: &'static str,
    pub stack_pointer: Reg,
    pub frame_pointer: Reg,
    pub int_return: Reg,
    pub float_return: Reg,

    pub int_regs: SmallVec<[Reg; 16]>,
    pub float_regs: SmallVec<[Reg; 8]>,
    pub int_arg_regs: SmallVec<[Reg; 8]>,
    pub float_arg_regs: SmallVec<[Reg; 8]>,
    pub int_transient_regs: SmallVec<[Reg; 8]>,
    pub int_persistent_regs: SmallVec<[Reg; 8]>,
    pub float_transient_regs: SmallVec<[Reg; 8]>,
    pub float_persistent_regs: SmallVec<[Reg; 8]>,

    pub stack_alignment: u32,
    pub stack_param_alignment: u32,
    pub stack_param_slot_size: u32,
    pub stack_shadow_space: u32,
    pub arg_register_slot_count: u32,
    pub stack_red_zone: bool,

    pub struct_arg_passing: StructPassing,
    pub struct_return_passing: StructPassing,
}

static CALL_CONVS: OnceLock<[CallConv; CALL_CONV_COUNT]> = OnceLock::new();

fn resolve_host_call_conv_kind() -> CallConvKind {
    // The backend targets Windows x64; the table is still built on other
    // hosts so the pipeline can be exercised in tests.
    match Triple::host().operating_system {
        OperatingSystem::Windows => CallConvKind::WindowsX64,
        _ => CallConvKind::WindowsX64,
    }
}

fn setup_call_conv_windows_x64() -> CallConv {
    let mut conv = CallConv {
        name: "win64",
        stack_pointer: Reg::int(4),
        frame_pointer: Reg::int(5),
        int_return: Reg::int(0),
        float_return: Reg::float(0),
        ..CallConv::default()
    };

    conv.int_regs = (0..16).filter(|&i| i != 4).map(Reg::int).collect();
    conv.float_regs = (0..4).map(Reg::float).collect();

    conv.int_arg_regs = [2, 3, 8, 9].iter().map(|&i| Reg::int(i)).collect();
    conv.float_arg_regs = (0..4).map(Reg::float).collect();

    conv.int_transient_regs = [0, 2, 3, 8, 9, 10, 11].iter().map(|&i| Reg::int(i)).collect();
    conv.int_persistent_regs = [1, 5, 6, 7, 12, 13, 14, 15].iter().map(|&i| Reg::int(i)).collect();
    conv.float_transient_regs = (0..4).map(Reg::float).collect();
    conv.float_persistent_regs = SmallVec::new();

    conv.stack_alignment = 16;
    conv.stack_param_alignment = 8;
    conv.stack_param_slot_size = 8;
    conv.stack_shadow_space = 32;
    conv.arg_register_slot_count = 4;
    conv.stack_red_zone = false;

    let by_value_mask = (1u64 << 1) | (1 << 2) | (1 << 4) | (1 << 8);
    conv.struct_arg_passing = StructPassing {
        pass_by_value_size_mask: by_value_mask,
        pass_by_value_in_int_slots: true,
        pass_by_reference_needs_copy: true,
    };
    conv.struct_return_passing = StructPassing {
        pass_by_value_size_mask: by_value_mask,
        ..StructPassing::default()
    };

    debug_assert!(conv.stack_alignment.is_power_of_two());
    conv
}

impl CallConv {
    /// Populate the process-wide convention table. Idempotent.
    pub fn setup() {
        CALL_CONVS.get_or_init(|| {
            let win64 = setup_call_conv_windows_x64();
            let host_kind = resolve_host_call_conv_kind();
            debug_assert_eq!(host_kind, CallConvKind::WindowsX64);

            let mut c = win64.clone();
            c.name = "c";
            let mut host = win64.clone();
            host.name = "host";
            [win64, c, host]
        });
    }

    fn table() -> &'static [CallConv; CALL_CONV_COUNT] {
        CALL_CONVS
            .get()
            .expect("CallConv::get before CallConv::setup")
    }

    /// The immutable record for `kind`. Must run after [`CallConv::setup`].
    pub fn get(kind: CallConvKind) -> &'static CallConv {
        let index = match kind {
            CallConvKind::WindowsX64 => 0,
            CallConvKind::C => 1,
            CallConvKind::Host => 2,
        };
        &Self::table()[index]
    }

    /// The host convention.
    pub fn host() -> &'static CallConv {
        Self::get(CallConvKind::Host)
    }

    /// The number of argument register slots a call site consumes. The
    /// explicit count wins; otherwise only slots common to both lanes are
    /// usable.
    pub fn num_arg_register_slots(&self) -> u32 {
        if self.arg_register_slot_count != 0 {
            return self.arg_register_slot_count;
        }
        (self.int_arg_regs.len() as u32).min(self.float_arg_regs.len() as u32)
    }

    /// Slot granularity for shadow space and stack-passed arguments.
    pub fn stack_slot_size(&self) -> u32 {
        if self.stack_param_slot_size != 0 {
            return self.stack_param_slot_size;
        }
        if self.stack_param_alignment != 0 {
            return self.stack_param_alignment;
        }
        8
    }

    pub fn can_pass_struct_arg_by_value(&self, size_in_bytes: u32) -> bool {
        self.struct_arg_passing.has_size_bit(size_in_bytes)
    }

    pub fn can_pass_struct_return_by_value(&self, size_in_bytes: u32) -> bool {
        self.struct_return_passing.has_size_bit(size_in_bytes)
    }

    pub fn classify_struct_arg_passing(&self, size_in_bytes: u32) -> StructPassingKind {
        if self.can_pass_struct_arg_by_value(size_in_bytes) {
            StructPassingKind::ByValue
        } else {
            StructPassingKind::ByReference
        }
    }

    pub fn classify_struct_return_passing(&self, size_in_bytes: u32) -> StructPassingKind {
        if self.can_pass_struct_return_by_value(size_in_bytes) {
            StructPassingKind::ByValue
        } else {
            StructPassingKind::ByReference
        }
    }

    pub fn is_int_arg_reg(&self, reg: Reg) -> bool {
        self.int_arg_regs.contains(&reg)
    }

    pub fn is_int_persistent_reg(&self, reg: Reg) -> bool {
        self.int_persistent_regs.contains(&reg)
    }

    pub fn is_float_persistent_reg(&self, reg: Reg) -> bool {
        self.float_persistent_regs.contains(&reg)
    }

    /// Pick two distinct integer scratch registers for ABI shuffles,
    /// avoiding the stack and frame pointers, the integer return register,
    /// every argument register, and the caller's `forbidden` set. The
    /// persistent file is preferred, then the transient file, then the full
    /// file. Fails atomically: on `None`, neither register is reserved.
    pub fn try_pick_int_scratch_regs(&self, forbidden: &[Reg]) -> Option<(Reg, Reg)> {
        let is_forbidden = |reg: Reg| {
            !reg.is_valid()
                || reg == self.stack_pointer
                || reg == self.frame_pointer
                || reg == self.int_return
                || self.is_int_arg_reg(reg)
                || forbidden.contains(&reg)
        };

        let pick = |taken: Option<Reg>| {
            for file in [
                self.int_persistent_regs.as_slice(),
                self.int_transient_regs.as_slice(),
                self.int_regs.as_slice(),
            ] {
                for &reg in file {
                    if Some(reg) == taken || is_forbidden(reg) {
                        continue;
                    }
                    return Some(reg);
                }
            }
            None
        };

        let first = pick(None)?;
        let second = pick(Some(first))?;
        Some((first, second))
    }
}

impl fmt::Display for CallConvKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CallConvKind::WindowsX64 => "win64",
            CallConvKind::C => "c",
            CallConvKind::Host => "host",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::regs;

    #[test]
    fn setup_is_idempotent_and_names_stick() {
        CallConv::setup();
        CallConv::setup();
        assert_eq!(CallConv::host().name, "host");
        assert_eq!(CallConv::get(CallConvKind::C).name, "c");
        assert_eq!(CallConv::get(CallConvKind::WindowsX64).name, "win64");
    }

    #[test]
    fn windows_x64_geometry() {
        CallConv::setup();
        let conv = CallConv::get(CallConvKind::WindowsX64);
        assert_eq!(conv.stack_alignment, 16);
        assert_eq!(conv.stack_shadow_space, 32);
        assert_eq!(conv.arg_register_slot_count, 4);
        assert_eq!(conv.num_arg_register_slots(), 4);
        assert_eq!(conv.stack_slot_size(), 8);
        assert!(!conv.stack_red_zone);
        for size in [1u32, 2, 4, 8] {
            assert_eq!(
                conv.classify_struct_arg_passing(size),
                StructPassingKind::ByValue
            );
            assert_eq!(
                conv.classify_struct_return_passing(size),
                StructPassingKind::ByValue
            );
        }
        for size in [0u32, 3, 5, 6, 7, 12, 16, 64, 100] {
            assert_eq!(
                conv.classify_struct_arg_passing(size),
                StructPassingKind::ByReference
            );
        }
    }

    #[test]
    fn register_files_are_consistent() {
        CallConv::setup();
        let conv = CallConv::get(CallConvKind::WindowsX64);
        assert_eq!(conv.stack_pointer, regs::rsp());
        assert_eq!(conv.frame_pointer, regs::rbp());
        assert_eq!(conv.int_return, regs::rax());
        assert_eq!(
            conv.int_arg_regs.as_slice(),
            &[regs::rcx(), regs::rdx(), regs::r8(), regs::r9()]
        );
        // Arg regs appear in the register file.
        for reg in &conv.int_arg_regs {
            assert!(conv.int_regs.contains(reg));
        }
        // Transient and persistent partition the file.
        for reg in &conv.int_regs {
            let t = conv.int_transient_regs.contains(reg);
            let p = conv.int_persistent_regs.contains(reg);
            assert!(t ^ p, "{reg:?} must be exactly one of transient/persistent");
        }
    }

    #[test]
    fn scratch_reg_selection_prefers_persistent() {
        CallConv::setup();
        let conv = CallConv::get(CallConvKind::WindowsX64);
        let (r0, r1) = conv.try_pick_int_scratch_regs(&[regs::rbx()]).unwrap();
        assert_eq!((r0, r1), (regs::rsi(), regs::rdi()));
        for reg in [r0, r1] {
            assert_ne!(reg, regs::rax());
            assert_ne!(reg, regs::rsp());
            assert_ne!(reg, regs::rbp());
            assert_ne!(reg, regs::rbx());
            assert!(!conv.is_int_arg_reg(reg));
        }
    }

    #[test]
    fn scratch_reg_selection_fails_atomically() {
        CallConv::setup();
        let conv = CallConv::get(CallConvKind::WindowsX64);
        // Forbid everything but one register: picking two must fail.
        let forbidden: Vec<Reg> = conv
            .int_regs
            .iter()
            .copied()
            .filter(|&r| r != regs::rsi())
            .collect();
        assert!(conv.try_pick_int_scratch_regs(&forbidden).is_none());
    }
}
