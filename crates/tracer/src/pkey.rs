//! Recovering the calling compartment's pkey from a stopped thread's
//! register state.
//!
//! On x86-64 the pkey lives in PKRU, which is not part of `user_regs_struct`
//! and must be read out of the inferior's extended FP state (`XSAVE`,
//! `NT_X86_XSTATE`) via `PTRACE_GETREGSET`. On AArch64 it is simply the top
//! byte of `x18`, which the wrapper sets directly.

use nix::unistd::Pid;

use crate::error::{Result, TracerError};

/// Reserved value meaning "no pkey corresponds to this PKRU bit pattern".
const PKEY_INVALID: u8 = 255;

/// `~((3<<2i)|3)` for i in [0,15].
fn pkru_for_pkey(pkey: u8) -> u32 {
    !(((3u32) << (2 * pkey as u32)) | 3)
}

/// Inverse of [`pkru_for_pkey`], plus glibc's non-canonical startup values
/// (`0x55555550`, `0x55555554`, and `0`), all of which this tracer treats
/// as pkey 0 rather than tightening to a fatal error.
pub fn pkey_for_pkru(pkru: u32) -> u8 {
    for pkey in 0..=15u8 {
        if pkru == pkru_for_pkey(pkey) {
            return pkey;
        }
    }
    match pkru {
        0x5555_5550 | 0x5555_5554 | 0 => 0,
        _ => PKEY_INVALID,
    }
}

/// The offset, in bytes, of the PKRU field within the XSAVE area's
/// extended state. PKRU lives in XSAVE component 9 ("protection keys"),
/// whose offset is *not* architecturally fixed: it depends on which other
/// components (AVX, MPX, AVX-512, ...) the running CPU enables ahead of
/// it in the save area. Computed once via `CPUID.(EAX=0DH,ECX=9):EBX` and
/// cached, rather than hardcoded, since a hardcoded offset would only be
/// correct on the exact XSAVE component layout of the CPU it was measured
/// on.
#[cfg(target_arch = "x86_64")]
fn pkru_xsave_offset() -> usize {
    use once_cell::sync::OnceCell;
    static OFFSET: OnceCell<usize> = OnceCell::new();
    *OFFSET.get_or_init(|| {
        let leaf = unsafe { std::arch::x86_64::__cpuid_count(0x0D, 9) };
        leaf.ebx as usize
    })
}

#[cfg(target_arch = "x86_64")]
pub fn current_pkey(pid: Pid) -> Result<u8> {
    use std::mem::MaybeUninit;

    let mut xsave_area = [0u8; 4096];
    let mut iov = libc::iovec {
        iov_base: xsave_area.as_mut_ptr() as *mut libc::c_void,
        iov_len: xsave_area.len(),
    };
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid.as_raw(),
            libc::NT_X86_XSTATE as *mut libc::c_void,
            &mut iov as *mut libc::iovec as *mut libc::c_void,
        )
    };
    if ret < 0 {
        return Err(TracerError::Ptrace(nix::Error::last()));
    }
    let mut pkru_bytes = MaybeUninit::<[u8; 4]>::uninit();
    unsafe {
        std::ptr::copy_nonoverlapping(
            xsave_area.as_ptr().add(pkru_xsave_offset()),
            pkru_bytes.as_mut_ptr() as *mut u8,
            4,
        );
    }
    let pkru = u32::from_ne_bytes(unsafe { pkru_bytes.assume_init() });
    let pkey = pkey_for_pkru(pkru);
    if pkey == PKEY_INVALID {
        return Err(TracerError::InvalidPkru { pkru });
    }
    Ok(pkey)
}

/// On AArch64 the compartment tag is the top byte of `x18`, set directly by
/// the call gate's AArch64 path rather than recovered from a control
/// register.
#[cfg(target_arch = "aarch64")]
pub fn current_pkey(pid: Pid) -> Result<u8> {
    use crate::regs::Regs;
    let regs = Regs::get(pid)?;
    Ok(((regs.x18() >> 56) & 0xff) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkru_round_trips_for_every_pkey() {
        for pkey in 0..=15u8 {
            assert_eq!(pkey_for_pkru(pkru_for_pkey(pkey)), pkey);
        }
    }

    #[test]
    fn glibc_startup_values_map_to_pkey_zero() {
        assert_eq!(pkey_for_pkru(0x5555_5550), 0);
        assert_eq!(pkey_for_pkru(0x5555_5554), 0);
        assert_eq!(pkey_for_pkru(0), 0);
    }

    #[test]
    fn unrecognized_pkru_is_invalid() {
        assert_eq!(pkey_for_pkru(0xdead_beef), PKEY_INVALID);
    }
}
