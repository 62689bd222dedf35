use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WrapgenError {
    #[error("caller pkey 0 uses a plain cast-and-call; no wrapper gate is emitted")]
    CallerIsUntrusted,

    #[error("caller and target are both pkey {pkey}; no gate is needed")]
    SameCompartment { pkey: u8 },

    #[error("indirect callsite wrappers require a signature, not a fixed target symbol")]
    IndirectCallsiteNeedsNoTarget,

    #[error("{kind:?} wrappers require a target symbol")]
    MissingTargetSymbol { kind: crate::WrapperKind },
}
