//! Maps a C function signature to the sequence of ABI "slot kinds" a
//! cross-compartment call gate must preserve across the stack switch.
//!
//! This mirrors the shape of Clang's `ABIArgInfo` classification
//! (`DetermineAbi.cpp` in the original tool) without depending on a full
//! Clang/LLVM toolchain: `ia2-rewriter` reduces a parsed C declaration down
//! to the small [`CType`] surface this crate classifies.

mod arch;
mod classify;
mod ctype;
mod error;
mod signature;
mod slot;

pub use arch::Arch;
pub use ctype::{CAggregate, CField, CType};
pub use error::AbiError;
pub use signature::AbiSignature;
pub use slot::SlotKind;

/// Classify a function prototype into an [`AbiSignature`] for the given
/// target architecture.
pub fn classify_function(
    args: &[CType],
    ret: &CType,
    variadic: bool,
    arch: Arch,
) -> Result<AbiSignature, AbiError> {
    classify::classify_function(args, ret, variadic, arch)
}
