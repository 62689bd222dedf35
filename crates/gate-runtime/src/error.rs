use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateRuntimeError {
    #[error("compartment {0} already has a stack allocated for this thread")]
    StackAlreadyInitialized(u8),

    #[error("ia2_stackptr_1 shares a page with ia2_stackptr_0; TLS layout needs more padding")]
    InsufficientTlsPadding,

    #[error("callgate exit policy selected but destructor in compartment {pkey} needs union PKRU")]
    ExitPolicyViolation { pkey: u8 },

    #[error("unknown IA2_EXIT_POLICY value {0:?}; falling back to callgate")]
    UnknownExitPolicy(String),
}

pub type Result<T> = std::result::Result<T, GateRuntimeError>;
