use thiserror::Error;

/// Tracer errors, per `SPEC_FULL.md` §7: `Fatal` kills the child and ends
/// the supervisor loop; `PolicyDenied` is recoverable and surfaces to the
/// child as `-EPERM`.
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("ptrace/waitpid failure: {0}")]
    Ptrace(#[from] nix::Error),

    #[error("could not install seccomp filter: {0}")]
    Seccomp(String),

    #[error("unexpected PKRU value {pkru:#010x} does not correspond to any pkey")]
    InvalidPkru { pkru: u32 },

    #[error("could not find a tracked memory map for pid {0}")]
    UnknownPid(i32),

    #[error("attempted to mark init finished twice")]
    DoubleInitFinished,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TracerError>;
