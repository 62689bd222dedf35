use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompartmentInitError {
    #[error("failed to allocate stack {index} ({source})")]
    StackAlloc { index: u8, source: std::io::Error },

    #[error("failed to pkey_mprotect stack {index} ({source})")]
    StackProtect { index: u8, source: std::io::Error },

    #[error("failed to tag loaded segment for compartment {index} ({source})")]
    SegmentProtect { index: u8, source: std::io::Error },

    #[error("ia2_stackptr_1 is too close to ia2_stackptr_0; TLS layout needs more padding")]
    InsufficientTlsPadding,

    #[error("failed to allocate protection key {0} ({1})")]
    PkeyAlloc(u8, std::io::Error),

    #[error("protection keys were not allocated in the expected order")]
    PkeyOrdering,

    #[error("MTE is not supported on this CPU")]
    MteUnsupported,

    #[error("prctl(PR_SET_TAGGED_ADDR_CTRL) failed to enable MTE ({0})")]
    MtePrctlFailed(std::io::Error),

    #[error("dl_iterate_phdr callback failed")]
    PhdrIteration,

    #[error("dlinfo(RTLD_DI_LINKMAP) failed for handle {0:#x}")]
    DlinfoFailed(usize),
}

pub type Result<T> = std::result::Result<T, CompartmentInitError>;
