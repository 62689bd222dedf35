use ia2_abi::{Arch, AbiSignature};

use crate::kind::WrapperKind;

/// Everything [`crate::emit_wrapper`] needs to generate one call gate.
#[derive(Debug, Clone)]
pub struct WrapperRequest {
    /// Symbol this wrapper defines, e.g. `__wrap_add` or
    /// `__ia2_indirect_Pvi`.
    pub wrapper_name: String,
    /// The direct target symbol to `call`/`bl`. `None` for
    /// [`WrapperKind::IndirectCallsite`], which loads its target from
    /// `ia2_fn_ptr` at call time instead.
    pub target_symbol: Option<String>,
    pub kind: WrapperKind,
    pub caller_pkey: u8,
    pub target_pkey: u8,
    pub signature: AbiSignature,
    pub arch: Arch,
    /// Emit the debug-only assertion that the current PKRU/tag equals the
    /// caller's mask before the gate begins.
    pub debug_assertions: bool,
}

impl WrapperRequest {
    pub fn target_symbol(&self) -> Result<&str, crate::WrapgenError> {
        if self.kind.is_indirect() {
            return Err(crate::WrapgenError::IndirectCallsiteNeedsNoTarget);
        }
        self.target_symbol
            .as_deref()
            .ok_or(crate::WrapgenError::MissingTargetSymbol { kind: self.kind })
    }
}
