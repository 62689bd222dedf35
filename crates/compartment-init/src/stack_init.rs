//! Per-thread stack allocation and pkey/MTE setup, ported from
//! `allocate_stack`, `allocate_stack_0`, `verify_tls_padding`,
//! `ia2_set_up_tags`, and `ia2_reinit_stack_err`.

use ia2_gate_runtime::stack::{set_stack_top, stack_top};

use crate::error::{CompartmentInitError, Result};

/// Each compartment gets a 4 MiB stack, matching `INIT_RUNTIME`'s
/// per-thread allocation.
pub const STACK_SIZE: usize = 4 * 1024 * 1024;

/// Allocates a fresh stack for compartment `pkey` and protects it with that
/// compartment's tag. Returns the top of the stack (not the base of the
/// mapping); each frame start + 8 is 16-byte aligned, matching the SysV/AAPCS
/// call convention's entry-point invariant.
pub fn allocate_stack(pkey: u8) -> Result<*mut u8> {
    // SAFETY: a fixed-size anonymous mapping with no file backing.
    let stack = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    if stack == libc::MAP_FAILED {
        return Err(CompartmentInitError::StackAlloc {
            index: pkey,
            source: std::io::Error::last_os_error(),
        });
    }
    let mut stack = stack as *mut u8;

    if pkey != 0 {
        pkey_mprotect(stack, STACK_SIZE, libc::PROT_READ | libc::PROT_WRITE, pkey)
            .map_err(|source| CompartmentInitError::StackProtect { index: pkey, source })?;
    }

    #[cfg(target_arch = "aarch64")]
    {
        // Tag the stack pointer itself so loads/stores through it carry
        // the right MTE tag.
        stack = ((stack as u64) | ((pkey as u64) << 56)) as *mut u8;
    }

    // SAFETY: offsetting within the STACK_SIZE allocation just made.
    Ok(unsafe { stack.add(STACK_SIZE - 8) })
}

#[cfg(target_arch = "x86_64")]
pub(crate) fn pkey_mprotect(addr: *mut u8, len: usize, prot: libc::c_int, pkey: u8) -> std::result::Result<(), std::io::Error> {
    // SAFETY: addr/len describe the mapping allocate_stack just created.
    let res = unsafe { libc::syscall(libc::SYS_pkey_mprotect, addr, len, prot, pkey as libc::c_int) };
    if res == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_arch = "x86_64"))]
pub(crate) fn pkey_mprotect(addr: *mut u8, len: usize, prot: libc::c_int, _pkey: u8) -> std::result::Result<(), std::io::Error> {
    // SAFETY: AArch64 has no pkey_mprotect; tagging happens via the stack
    // pointer's top byte instead, so this is a plain mprotect.
    let res = unsafe { libc::mprotect(addr as *mut libc::c_void, len, prot) };
    if res == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Allocates compartment 0's stack and records it in the current thread's
/// stack-pointer slot. Compartment 0 is unprivileged and never pkey-tagged.
pub fn allocate_stack_0() -> Result<()> {
    let top = allocate_stack(0)?;
    set_stack_top(0, top);
    Ok(())
}

/// Confirms compartment 0's and compartment 1's stack-pointer TLS slots do
/// not share a page; if they did, compartment 1's `pkey_mprotect` of its
/// own TLS page could clobber bytes compartment 0 still needs to read.
pub fn verify_tls_padding() -> Result<()> {
    let Some(ptr0) = stack_top(0) else {
        return Ok(());
    };
    let Some(ptr1) = stack_top(1) else {
        return Ok(());
    };
    const PAGE_SIZE: usize = 4096;
    let page0 = (ptr0 as usize) & !(PAGE_SIZE - 1);
    let page1 = (ptr1 as usize) & !(PAGE_SIZE - 1);
    if page0 == page1 {
        return Err(CompartmentInitError::InsufficientTlsPadding);
    }
    Ok(())
}

/// Allocates the pkeys this process needs (x86-64) or enables MTE
/// (AArch64). `n_to_alloc` is consumed (set to 0) once done, the same way
/// the C constructor only runs its body once across repeated includes of
/// `ia2_compartment_init.inc`.
#[cfg(target_arch = "x86_64")]
pub fn ia2_set_up_tags(n_to_alloc: &mut i32) -> Result<()> {
    if *n_to_alloc == 0 {
        return Ok(());
    }
    for pkey in 1..=*n_to_alloc {
        // SAFETY: pkey_alloc takes no pointers; flags/access_rights are 0.
        let allocated = unsafe { libc::syscall(libc::SYS_pkey_alloc, 0, 0) };
        if allocated < 0 {
            return Err(CompartmentInitError::PkeyAlloc(pkey as u8, std::io::Error::last_os_error()));
        }
        if allocated as i32 != pkey {
            return Err(CompartmentInitError::PkeyOrdering);
        }
    }
    *n_to_alloc = 0;
    Ok(())
}

#[cfg(target_arch = "aarch64")]
pub fn ia2_set_up_tags(n_to_alloc: &mut i32) -> Result<()> {
    const AT_HWCAP2: libc::c_ulong = 26;
    const HWCAP2_MTE: libc::c_ulong = 1 << 18;
    const PR_SET_TAGGED_ADDR_CTRL: libc::c_int = 55;
    const PR_TAGGED_ADDR_ENABLE: libc::c_ulong = 1;
    const PR_MTE_TCF_SYNC: libc::c_ulong = 1 << 1;
    const PR_MTE_TAG_SHIFT: libc::c_ulong = 3;

    // SAFETY: getauxval reads the process's own auxv; no pointers involved.
    let hwcap2 = unsafe { libc::getauxval(AT_HWCAP2) };
    if hwcap2 & HWCAP2_MTE == 0 {
        return Err(CompartmentInitError::MteUnsupported);
    }
    let flags = PR_TAGGED_ADDR_ENABLE | PR_MTE_TCF_SYNC | (0xFFFEu64 << PR_MTE_TAG_SHIFT);
    // SAFETY: prctl with no pointer arguments.
    let res = unsafe { libc::prctl(PR_SET_TAGGED_ADDR_CTRL, flags, 0, 0, 0) };
    if res != 0 {
        return Err(CompartmentInitError::MtePrctlFailed(std::io::Error::last_os_error()));
    }
    *n_to_alloc = 0;
    Ok(())
}

/// Aborts the process: a compartment tried to reinitialize a stack that
/// already has one, which would silently discard whatever it was pointing
/// at.
pub fn ia2_reinit_stack_err(pkey: u8) -> ! {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    tracing::error!(pkey, tid, "compartment tried to allocate an existing stack");
    std::process::abort();
}
