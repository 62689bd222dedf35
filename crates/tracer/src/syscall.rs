//! Decodes a stopped thread's in-flight syscall into an [`Event`] the
//! permit table (`ia2_memmap`) can consult.

use ia2_memmap::Prot;

use crate::regs::Regs;

/// One variant per memory-management syscall the seccomp filter traces,
/// plus lifecycle events that do not arrive as syscall-stops
/// (`Clone`/`Exec`) and `None` for anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Mmap,
    Munmap,
    Mremap,
    Madvise,
    Mprotect,
    PkeyMprotect,
    Clone,
    Exec,
    None,
}

#[derive(Debug, Clone, Copy)]
pub struct MmapInfo {
    pub addr: u64,
    pub len: u64,
    pub prot: Prot,
    pub flags: i32,
}

#[derive(Debug, Clone, Copy)]
pub struct MunmapInfo {
    pub addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MremapInfo {
    pub old_addr: u64,
    pub old_len: u64,
    pub new_len: u64,
    pub flags: i32,
    /// Only meaningful when `flags & MREMAP_FIXED`.
    pub new_addr_hint: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MadviseInfo {
    pub addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MprotectInfo {
    pub addr: u64,
    pub len: u64,
    pub prot: Prot,
}

#[derive(Debug, Clone, Copy)]
pub struct PkeyMprotectInfo {
    pub addr: u64,
    pub len: u64,
    pub prot: Prot,
    pub new_pkey: u8,
}

/// The decoded arguments of one in-flight memory-management syscall.
#[derive(Debug, Clone, Copy)]
pub enum EventInfo {
    Mmap(MmapInfo),
    Munmap(MunmapInfo),
    Mremap(MremapInfo),
    Madvise(MadviseInfo),
    Mprotect(MprotectInfo),
    PkeyMprotect(PkeyMprotectInfo),
    None,
}

const MAP_FIXED: i32 = libc::MAP_FIXED;
const MREMAP_FIXED: i32 = libc::MREMAP_FIXED;
pub const MREMAP_DONTUNMAP: i32 = 4; // not exposed by libc on all targets

fn event_from_nr(nr: i64) -> Event {
    match nr {
        _ if nr == libc::SYS_mmap => Event::Mmap,
        _ if nr == libc::SYS_munmap => Event::Munmap,
        _ if nr == libc::SYS_mremap => Event::Mremap,
        _ if nr == libc::SYS_madvise => Event::Madvise,
        _ if nr == libc::SYS_mprotect => Event::Mprotect,
        _ if nr == libc::SYS_pkey_mprotect => Event::PkeyMprotect,
        _ => Event::None,
    }
}

/// Decode the syscall a thread is stopped at syscall-entry for.
/// `Event::Clone`/`Event::Exec` are produced directly from
/// `PTRACE_EVENT_{CLONE,FORK,EXEC}` stops by the supervisor loop, not
/// from this function.
pub fn interpret(regs: &Regs) -> (Event, EventInfo) {
    let event = event_from_nr(regs.syscall_nr());
    let info = match event {
        Event::Mmap => EventInfo::Mmap(MmapInfo {
            addr: regs.arg(0),
            len: regs.arg(1),
            prot: Prot(regs.arg(2) as u32),
            flags: regs.arg(3) as i32,
        }),
        Event::Munmap => EventInfo::Munmap(MunmapInfo {
            addr: regs.arg(0),
            len: regs.arg(1),
        }),
        Event::Mremap => {
            let flags = regs.arg(3) as i32;
            let new_addr_hint = if flags & MREMAP_FIXED != 0 { regs.arg(4) } else { regs.arg(0) };
            EventInfo::Mremap(MremapInfo {
                old_addr: regs.arg(0),
                old_len: regs.arg(1),
                new_len: regs.arg(2),
                flags,
                new_addr_hint,
            })
        }
        Event::Madvise => EventInfo::Madvise(MadviseInfo {
            addr: regs.arg(0),
            len: regs.arg(1),
        }),
        Event::Mprotect => EventInfo::Mprotect(MprotectInfo {
            addr: regs.arg(0),
            len: regs.arg(1),
            prot: Prot(regs.arg(2) as u32),
        }),
        Event::PkeyMprotect => EventInfo::PkeyMprotect(PkeyMprotectInfo {
            addr: regs.arg(0),
            len: regs.arg(1),
            prot: Prot(regs.arg(2) as u32),
            new_pkey: regs.arg(3) as u8,
        }),
        Event::Clone | Event::Exec | Event::None => EventInfo::None,
    };
    (event, info)
}

/// Re-read a syscall's result at syscall-exit, replacing the pre-call
/// `addr`/`start` field with the kernel-chosen address for non-`MAP_FIXED`
/// `mmap`/`mremap(MAYMOVE)`, applying the result of a permitted anonymous
/// mmap once the kernel has chosen `start`.
pub fn refine_with_result(event: Event, info: &mut EventInfo, retval: i64) {
    if retval < 0 {
        return;
    }
    match (event, info) {
        (Event::Mmap, EventInfo::Mmap(m)) => m.addr = retval as u64,
        (Event::Mremap, EventInfo::Mremap(m)) => m.new_addr_hint = retval as u64,
        _ => {}
    }
}

pub fn is_mmap_fixed(info: &MmapInfo) -> bool {
    info.flags & MAP_FIXED != 0
}

pub fn mremap_dont_unmap(info: &MremapInfo) -> bool {
    info.flags & MREMAP_DONTUNMAP != 0
}

/// Whether this `mmap` call is the "finish init" signpost:
/// `mmap(MAP_FIXED, addr=0x1a21face1a21face, …)`, always rejected by the
/// kernel with `EINVAL` but uniquely identifiable beforehand.
pub fn is_init_finished_signpost(event: Event, info: &EventInfo) -> bool {
    matches!(
        (event, info),
        (Event::Mmap, EventInfo::Mmap(m))
            if m.addr == ia2_memmap::INIT_FINISHED_SIGNPOST_ADDR && is_mmap_fixed(m)
    )
}
