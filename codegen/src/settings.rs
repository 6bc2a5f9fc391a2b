//! Build configuration consumed by the pipeline driver.

use crate::abi::CallConvKind;

/// Backend optimization level.
///
/// `O0` runs only the mandatory passes (register allocation, prolog/epilog,
/// legalization, emission). `O1` and above also run the optimizing passes
/// and unlock small strength-reduction encodings such as `add r, 1` ->
/// `inc r`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    O0,
    O1,
    O2,
}

/// Per-compilation flags, set by the driver.
#[derive(Clone, Copy, Debug)]
pub struct Flags {
    pub opt_level: OptLevel,
    pub call_conv: CallConvKind,
    pub preserve_persistent_regs: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            opt_level: OptLevel::O2,
            call_conv: CallConvKind::Host,
            preserve_persistent_regs: true,
        }
    }
}
