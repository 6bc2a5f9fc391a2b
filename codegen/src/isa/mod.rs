//! Target instruction-set support.
//!
//! The Micro-IR above this layer is target-independent; everything that
//! knows about instruction bytes lives here.

pub mod x64;
