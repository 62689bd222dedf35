//! Architecture-abstracted access to a stopped thread's general-purpose
//! registers: `PTRACE_GETREGS` on x86-64, `PTRACE_GETREGSET`/`NT_PRSTATUS`
//! on AArch64.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::error::{Result, TracerError};

/// The subset of a syscall-stop's register state the tracer needs: the
/// syscall number, its first five arguments, the return value (valid only
/// at syscall-exit), and the PC (for diagnostics).
#[derive(Debug, Clone, Copy, Default)]
pub struct Regs {
    inner: libc::user_regs_struct,
}

impl Regs {
    pub fn get(pid: Pid) -> Result<Self> {
        let inner = ptrace::getregs(pid)?;
        Ok(Self { inner })
    }

    pub fn set(&self, pid: Pid) -> Result<()> {
        ptrace::setregs(pid, self.inner)?;
        Ok(())
    }

    #[cfg(target_arch = "x86_64")]
    pub fn syscall_nr(&self) -> i64 {
        self.inner.orig_rax as i64
    }

    #[cfg(target_arch = "x86_64")]
    pub fn set_syscall_nr(&mut self, nr: i64) {
        self.inner.orig_rax = nr as u64;
    }

    #[cfg(target_arch = "x86_64")]
    pub fn retval(&self) -> i64 {
        self.inner.rax as i64
    }

    #[cfg(target_arch = "x86_64")]
    pub fn set_retval(&mut self, value: i64) {
        self.inner.rax = value as u64;
    }

    #[cfg(target_arch = "x86_64")]
    pub fn arg(&self, index: usize) -> u64 {
        match index {
            0 => self.inner.rdi,
            1 => self.inner.rsi,
            2 => self.inner.rdx,
            3 => self.inner.r10,
            4 => self.inner.r8,
            5 => self.inner.r9,
            _ => panic!("syscalls take at most 6 arguments"),
        }
    }

    #[cfg(target_arch = "x86_64")]
    pub fn pc(&self) -> u64 {
        self.inner.rip
    }

    #[cfg(target_arch = "aarch64")]
    pub fn syscall_nr(&self) -> i64 {
        self.inner.regs[8] as i64
    }

    #[cfg(target_arch = "aarch64")]
    pub fn set_syscall_nr(&mut self, nr: i64) {
        self.inner.regs[8] = nr as u64;
    }

    #[cfg(target_arch = "aarch64")]
    pub fn retval(&self) -> i64 {
        self.inner.regs[0] as i64
    }

    #[cfg(target_arch = "aarch64")]
    pub fn set_retval(&mut self, value: i64) {
        self.inner.regs[0] = value as u64;
    }

    #[cfg(target_arch = "aarch64")]
    pub fn arg(&self, index: usize) -> u64 {
        assert!(index < 6, "syscalls take at most 6 arguments");
        self.inner.regs[index]
    }

    #[cfg(target_arch = "aarch64")]
    pub fn pc(&self) -> u64 {
        self.inner.pc
    }

    #[cfg(target_arch = "aarch64")]
    pub fn x18(&self) -> u64 {
        self.inner.regs[18]
    }
}

/// Rewrite the in-flight syscall to `-1` (an invalid syscall number, which
/// the kernel fails harmlessly) so that it can be forced to return
/// `-EPERM` after it completes.
pub fn deny_syscall(pid: Pid) -> Result<()> {
    let mut regs = Regs::get(pid)?;
    regs.set_syscall_nr(-1);
    regs.set(pid)?;
    ptrace::syscall(pid, None)?;
    nix::sys::wait::waitpid(pid, None)?;
    let mut regs = Regs::get(pid)?;
    regs.set_retval(-libc::EPERM as i64);
    regs.set(pid)?;
    Ok(())
}

/// Resolve a raw `PTRACE_GETREGSET`/AArch64 failure path consistently with
/// the rest of the crate's `Result` type.
pub fn get_or_fatal(pid: Pid) -> Result<Regs> {
    Regs::get(pid).map_err(|_| {
        TracerError::Ptrace(nix::Error::last())
    })
}
