//! Result and error types reported at the compilation boundary.
//!
//! Inside the pass pipeline there is no in-band error channel: broken
//! invariants are programmer errors and assert. The variants here cover the
//! cases where a *function* must be abandoned and the job reported as
//! failed.

use std::fmt;

/// A compilation error, reported once per abandoned function.
#[derive(Debug)]
pub enum CodegenError {
    /// The encoder answered `NotSupported` for an instruction and the
    /// legalizer has no rewrite for it.
    Unsupported(String),

    /// A displacement or immediate does not fit the encoding the pipeline
    /// committed to.
    ImmediateOutOfRange { what: &'static str, value: u64 },

    /// The IR failed a structural check (an unresolved label, a virtual
    /// register surviving allocation, ...).
    Verifier(String),
}

/// A convenient alias for `Result` over [`CodegenError`].
pub type CodegenResult<T> = Result<T, CodegenError>;

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodegenError::Unsupported(msg) => write!(f, "unsupported encoding: {msg}"),
            CodegenError::ImmediateOutOfRange { what, value } => {
                write!(f, "{what} out of range: {value:#x}")
            }
            CodegenError::Verifier(msg) => write!(f, "verifier error: {msg}"),
        }
    }
}

impl std::error::Error for CodegenError {}

/// Report an unrecoverable backend failure for the current function.
///
/// This is the single funnel to the diagnostics sink: the failure is logged
/// against the module that owns the function, and the returned error
/// propagates outward as the job status.
pub fn internal_error(module: &str, message: impl Into<String>) -> CodegenError {
    let message = message.into();
    log::error!("internal backend error in `{module}`: {message}");
    CodegenError::Unsupported(message)
}
