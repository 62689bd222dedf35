//! The tracer main loop: fork+exec the guarded program under
//! `PTRACE_TRACEME` + seccomp, then alternate between waiting for a trap
//! and consulting [`ia2_memmap::MemoryMap`] to permit or deny each
//! memory-management syscall.

use std::ffi::CString;

use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, info, warn};

use ia2_memmap::{CloneKind, MemoryMap, Prot, SyscallOutcome};

use crate::args::TracerArgs;
use crate::error::{Result, TracerError};
use crate::pkey;
use crate::regs::Regs;
use crate::syscall::{self, Event, EventInfo};
use crate::{landlock, seccomp};

/// One traced process's authoritative map, plus every tid currently
/// sharing its address space.
struct ProcessMap {
    map: MemoryMap,
    tids: Vec<Pid>,
}

/// All address spaces the supervisor currently tracks, keyed by an
/// arbitrary slot id (not the pid, since a pid can move between slots on
/// `fork`).
#[derive(Default)]
pub struct Supervisor {
    processes: Vec<ProcessMap>,
}

impl Supervisor {
    fn find_mut(&mut self, tid: Pid) -> Option<&mut ProcessMap> {
        self.processes.iter_mut().find(|p| p.tids.contains(&tid))
    }

    fn add_tid(&mut self, owner: Pid, new_tid: Pid) {
        if let Some(p) = self.find_mut(owner) {
            p.tids.push(new_tid);
        }
    }

    fn remove_tid(&mut self, tid: Pid) -> bool {
        let idx = self.processes.iter().position(|p| p.tids.contains(&tid));
        let Some(idx) = idx else { return false };
        let p = &mut self.processes[idx];
        p.tids.retain(|&t| t != tid);
        if p.tids.is_empty() {
            self.processes.remove(idx);
        }
        true
    }

    fn fork_child_map(&mut self, parent_tid: Pid, child_tid: Pid) {
        if let Some(p) = self.find_mut(parent_tid) {
            if let Some(cloned) = p.map.on_clone(CloneKind::Fork) {
                self.processes.push(ProcessMap {
                    map: cloned,
                    tids: vec![child_tid],
                });
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

/// Entry point: fork, set up the child under seccomp + ptrace, then run
/// the supervisor loop until every traced process has exited.
pub fn run(args: &TracerArgs) -> Result<i32> {
    let prog = seccomp::build_filter()?;

    match unsafe { fork() }? {
        ForkResult::Child => {
            if args.landlock {
                let _ = landlock::apply_proc_self_mem_blacklist();
            }
            seccomp::apply_in_child(&prog)?;
            ptrace::traceme()?;
            nix::sys::signal::raise(Signal::SIGSTOP)?;
            exec_child(args)?;
            unreachable!("execve only returns on error, which exec_child already propagated");
        }
        ForkResult::Parent { child } => {
            waitpid(child, Some(WaitPidFlag::__WALL))?;
            set_trace_options(child)?;
            ptrace::cont(child, None)?;
            run_loop(child)
        }
    }
}

fn exec_child(args: &TracerArgs) -> Result<()> {
    let program = CString::new(args.command.as_os_str().to_string_lossy().into_owned())
        .expect("path has no interior NUL");
    let mut argv: Vec<CString> = vec![program.clone()];
    for a in &args.command_args {
        argv.push(CString::new(a.as_str()).expect("argument has no interior NUL"));
    }
    nix::unistd::execv(&program, &argv).map_err(TracerError::Ptrace)?;
    Ok(())
}

fn set_trace_options(pid: Pid) -> Result<()> {
    use ptrace::Options;
    let opts = Options::PTRACE_O_EXITKILL
        | Options::PTRACE_O_TRACESECCOMP
        | Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEVFORK
        | Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEEXEC
        | Options::PTRACE_O_TRACESYSGOOD;
    ptrace::setoptions(pid, opts)?;
    Ok(())
}

fn run_loop(root_pid: Pid) -> Result<i32> {
    let mut sup = Supervisor {
        processes: vec![ProcessMap {
            map: MemoryMap::new(),
            tids: vec![root_pid],
        }],
    };

    loop {
        let status = waitpid(None, Some(WaitPidFlag::__WALL))?;
        let (tid, exit_code) = match status {
            WaitStatus::Exited(pid, code) => {
                debug!(pid = pid.as_raw(), code, "process exited");
                sup.remove_tid(pid);
                if sup.is_empty() {
                    return Ok(code);
                }
                continue;
            }
            WaitStatus::Signaled(pid, sig, _) => {
                warn!(pid = pid.as_raw(), ?sig, "process killed by signal");
                sup.remove_tid(pid);
                if sup.is_empty() {
                    return Ok(128 + sig as i32);
                }
                continue;
            }
            WaitStatus::PtraceEvent(pid, _sig, event) => {
                handle_ptrace_event(&mut sup, pid, event)?;
                continue;
            }
            WaitStatus::PtraceSyscall(pid) => (pid, None),
            WaitStatus::Stopped(pid, Signal::SIGTRAP) => (pid, None),
            WaitStatus::Stopped(pid, sig) => {
                // Group-stop / unrelated signal: pass it through untouched.
                let _ = ptrace::cont(pid, Some(sig));
                continue;
            }
            other => {
                debug!(?other, "unhandled wait status");
                continue;
            }
        };

        if let Some(code) = exit_code {
            return Ok(code);
        }

        handle_syscall_stop(&mut sup, tid)?;
    }
}

fn handle_ptrace_event(sup: &mut Supervisor, pid: Pid, event: i32) -> Result<()> {
    const PTRACE_EVENT_FORK: i32 = 1;
    const PTRACE_EVENT_CLONE: i32 = 3;
    const PTRACE_EVENT_EXEC: i32 = 4;

    match event {
        PTRACE_EVENT_CLONE => {
            let new_tid = Pid::from_raw(ptrace::getevent(pid)? as i32);
            debug!(parent = pid.as_raw(), child = new_tid.as_raw(), "clone");
            sup.add_tid(pid, new_tid);
        }
        PTRACE_EVENT_FORK => {
            let new_pid = Pid::from_raw(ptrace::getevent(pid)? as i32);
            debug!(parent = pid.as_raw(), child = new_pid.as_raw(), "fork");
            sup.fork_child_map(pid, new_pid);
        }
        PTRACE_EVENT_EXEC => {
            debug!(pid = pid.as_raw(), "exec");
            if let Some(p) = sup.find_mut(pid) {
                p.map.on_execve();
            }
        }
        other => {
            debug!(pid = pid.as_raw(), event = other, "unhandled ptrace event");
        }
    }
    ptrace::cont(pid, None)?;
    Ok(())
}

fn handle_syscall_stop(sup: &mut Supervisor, tid: Pid) -> Result<()> {
    let regs = Regs::get(tid)?;
    if regs.syscall_nr() == -1 {
        // Our own denial already rewrote this; nothing further to do.
        ptrace::cont(tid, None)?;
        return Ok(());
    }

    let current_pkey = read_current_pkey(tid)?;
    let (event, mut info) = syscall::interpret(&regs);

    let Some(proc_map) = sup.find_mut(tid) else {
        return Err(TracerError::UnknownPid(tid.as_raw()));
    };

    if syscall::is_init_finished_signpost(event, &info) {
        if !proc_map.map.try_mark_init_finished(match &info {
            EventInfo::Mmap(m) => m.addr,
            _ => 0,
        }) {
            return Err(TracerError::DoubleInitFinished);
        }
        info!(pid = tid.as_raw(), "compartment init finished signpost observed");
        crate::regs::deny_syscall(tid)?;
        ptrace::cont(tid, None)?;
        return Ok(());
    }

    let outcome = permit(&proc_map.map, event, &info, current_pkey);
    if outcome == SyscallOutcome::Denied {
        warn!(pid = tid.as_raw(), ?event, pkey = current_pkey, "denying syscall");
        crate::regs::deny_syscall(tid)?;
        ptrace::cont(tid, None)?;
        return Ok(());
    }

    // Permitted: let the real syscall run to completion, then apply its
    // effect to the map using the actual kernel-chosen result.
    ptrace::syscall(tid, None)?;
    waitpid(tid, Some(WaitPidFlag::__WALL))?;
    let exit_regs = Regs::get(tid)?;
    syscall::refine_with_result(event, &mut info, exit_regs.retval());
    if exit_regs.retval() >= 0 {
        apply(&mut proc_map.map, event, &info, current_pkey);
    }
    ptrace::cont(tid, None)?;
    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn read_current_pkey(tid: Pid) -> Result<u8> {
    pkey::current_pkey(tid)
}

#[cfg(target_arch = "aarch64")]
fn read_current_pkey(tid: Pid) -> Result<u8> {
    pkey::current_pkey(tid)
}

fn permit(map: &MemoryMap, event: Event, info: &EventInfo, current_pkey: u8) -> SyscallOutcome {
    match (event, info) {
        (Event::Mmap, EventInfo::Mmap(m)) => {
            if !syscall::is_mmap_fixed(m) && m.addr == 0 {
                map.check_mmap_anonymous()
            } else {
                map.check_mmap_fixed(m.addr, m.len, current_pkey)
            }
        }
        (Event::Munmap, EventInfo::Munmap(m)) => map.check_munmap(m.addr, m.len, current_pkey),
        (Event::Mremap, EventInfo::Mremap(m)) => {
            map.check_mremap(m.old_addr, m.old_len, current_pkey)
        }
        (Event::Madvise, EventInfo::Madvise(m)) => map.check_madvise(m.addr, m.len, current_pkey),
        (Event::Mprotect, EventInfo::Mprotect(m)) => map.check_mprotect(m.addr, m.len, m.prot),
        (Event::PkeyMprotect, EventInfo::PkeyMprotect(m)) => {
            map.check_pkey_mprotect(m.addr, m.len, m.new_pkey, current_pkey)
        }
        _ => SyscallOutcome::Permitted,
    }
}

fn apply(map: &mut MemoryMap, event: Event, info: &EventInfo, current_pkey: u8) {
    match (event, info) {
        (Event::Mmap, EventInfo::Mmap(m)) => {
            if syscall::is_mmap_fixed(m) {
                map.apply_mmap_fixed(m.addr, m.len, m.prot, current_pkey);
            } else {
                map.apply_mmap_anonymous(m.addr, m.len, m.prot, current_pkey);
            }
        }
        (Event::Munmap, EventInfo::Munmap(m)) => map.apply_munmap(m.addr, m.len),
        (Event::Mremap, EventInfo::Mremap(m)) => {
            let prot = map
                .regions()
                .iter()
                .find(|r| r.start <= m.old_addr && m.old_addr < r.start + r.len)
                .map(|r| r.prot)
                .unwrap_or(Prot::READ);
            map.apply_mremap(
                m.old_addr,
                m.old_len,
                m.new_addr_hint,
                m.new_len,
                prot,
                current_pkey,
                syscall::mremap_dont_unmap(m),
            )
        }
        (Event::Mprotect, EventInfo::Mprotect(m)) => map.apply_mprotect(m.addr, m.len, m.prot),
        (Event::PkeyMprotect, EventInfo::PkeyMprotect(m)) => {
            map.apply_pkey_mprotect(m.addr, m.len, m.prot, m.new_pkey)
        }
        _ => {}
    }
}
