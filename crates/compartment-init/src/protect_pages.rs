//! Constructor-time ELF segment tagging, ported from `protect_pages` /
//! `protect_tls_pages` / `in_loaded_segment` / `in_extra_libraries` in
//! `original_source/runtime/libia2/ia2.c`.
//!
//! `dl_iterate_phdr` walks every loaded shared object; for each one that
//! either contains the calling constructor's own address or matches an
//! `extra_libraries` entry, every writable `PT_LOAD` segment is carved into
//! sub-ranges that exclude the shared/RELRO ranges and `pkey_mprotect`'d to
//! the current compartment's pkey.

use std::ffi::{c_int, c_void, CStr};

use crate::error::{CompartmentInitError, Result};
use crate::stack_init::pkey_mprotect;

const PAGE_SIZE: u64 = 4096;
const PAGE_MASK: u64 = !(PAGE_SIZE - 1);

/// One `[start, end)` range excluded from protection (a shared data
/// section, or a RELRO segment).
#[derive(Debug, Clone, Copy)]
pub struct SharedRange {
    pub start: u64,
    pub end: u64,
}

/// Arguments threaded through to the `dl_iterate_phdr` callback, mirroring
/// `struct PhdrSearchArgs`.
pub struct PhdrSearchArgs<'a> {
    pub pkey: u8,
    /// An address inside the constructor currently running; identifies
    /// which loaded object "owns" this compartment's code.
    pub anchor_address: usize,
    /// Semicolon-separated, prefix-matched extra library basenames this
    /// compartment also owns.
    pub extra_libraries: Option<&'a str>,
    pub shared_sections: &'a [SharedRange],
    pub found_library_count: usize,
}

fn segment_flags_to_prot(flags: u32) -> libc::c_int {
    let mut prot = 0;
    if flags & libc::PF_X != 0 {
        prot |= libc::PROT_EXEC;
    }
    if flags & libc::PF_W != 0 {
        prot |= libc::PROT_WRITE;
    }
    if flags & libc::PF_R != 0 {
        prot |= libc::PROT_READ;
    }
    prot
}

/// Prefix-match against a `;`-separated list, the same rule as
/// `in_extra_libraries`: an exact match or a prefix ending at a `;`
/// boundary counts (covers versioned `.so.N` suffixes).
fn in_extra_libraries(basename: &str, extra_libraries: Option<&str>) -> bool {
    let Some(list) = extra_libraries else { return false };
    if basename.is_empty() {
        return false;
    }
    list.split(';').any(|entry| !entry.is_empty() && basename.starts_with(entry))
}

fn in_loaded_segment(info: &libc::dl_phdr_info, address: usize) -> bool {
    if info.dlpi_phdr.is_null() {
        return false;
    }
    for i in 0..info.dlpi_phnum as isize {
        // SAFETY: `dlpi_phdr` points at `dlpi_phnum` contiguous `Elf64_Phdr`s,
        // guaranteed valid for the duration of the dl_iterate_phdr callback.
        let phdr = unsafe { *info.dlpi_phdr.offset(i) };
        if phdr.p_type != libc::PT_LOAD {
            continue;
        }
        let start = info.dlpi_addr + phdr.p_vaddr;
        let end = start + phdr.p_memsz;
        if (start as usize) <= address && address <= (end as usize) {
            return true;
        }
    }
    false
}

fn dso_basename(info: &libc::dl_phdr_info) -> String {
    if info.dlpi_name.is_null() {
        return String::new();
    }
    // SAFETY: `dlpi_name` is a NUL-terminated string owned by the loader,
    // valid for the duration of the callback.
    let name = unsafe { CStr::from_ptr(info.dlpi_name) }.to_string_lossy();
    name.rsplit('/').next().unwrap_or(&name).to_string()
}

/// Carves `[start, seg_end)` into the sub-ranges not covered by
/// `shared_ranges`, calling `f(sub_start, sub_len)` for each non-empty
/// piece, in ascending order — the Rust equivalent of `protect_pages`'s
/// inner `while (start < seg_end)` loop.
fn for_each_unshared_subrange(start: u64, seg_end: u64, shared_ranges: &[SharedRange], mut f: impl FnMut(u64, u64)) {
    let mut start = start;
    while start < seg_end {
        let mut cur_end = seg_end;
        for r in shared_ranges {
            if r.start <= start && r.end > start {
                start = r.end;
            }
            if r.start > start && r.start < cur_end {
                cur_end = r.start;
            }
        }
        if cur_end > start {
            f(start, cur_end - start);
            start = cur_end;
        } else if start < seg_end {
            // A shared range swallowed the rest of the segment.
            break;
        }
    }
}

/// Touches every page in `[start, start+len)` with a read, proving this
/// compartment can already access it before excluding every other
/// compartment via `pkey_mprotect`.
fn probe_pages(start: u64, len: u64) {
    let mut off = 0u64;
    while off < len {
        // SAFETY: the caller has verified `[start, start+len)` is a live
        // mapping belonging to this process (it came from a `PT_LOAD`
        // segment just walked by `dl_iterate_phdr`).
        unsafe {
            std::ptr::read_volatile((start + off) as *const u8);
        }
        off += PAGE_SIZE;
    }
}

/// `protect_pages`: tags every writable `PT_LOAD` segment of the object
/// containing `args.anchor_address` (or matching `extra_libraries`) with
/// `args.pkey`, skipping `args.shared_sections` and any `PT_GNU_RELRO`
/// range.
pub fn protect_pages(info: &libc::dl_phdr_info, args: &mut PhdrSearchArgs) -> Result<()> {
    let basename = dso_basename(info);
    let extra = in_extra_libraries(&basename, args.extra_libraries);
    if !in_loaded_segment(info, args.anchor_address) && !extra {
        return Ok(());
    }
    if extra {
        args.found_library_count += 1;
    }

    let mut shared_ranges: Vec<SharedRange> = args.shared_sections.to_vec();
    for i in 0..info.dlpi_phnum as isize {
        // SAFETY: see `in_loaded_segment`.
        let phdr = unsafe { *info.dlpi_phdr.offset(i) };
        if phdr.p_type == libc::PT_GNU_RELRO {
            let start = (info.dlpi_addr + phdr.p_vaddr) & PAGE_MASK;
            let end = (start + phdr.p_memsz + PAGE_SIZE - 1) & PAGE_MASK;
            shared_ranges.push(SharedRange { start, end });
            break;
        }
    }

    for i in 0..info.dlpi_phnum as isize {
        // SAFETY: see `in_loaded_segment`.
        let phdr = unsafe { *info.dlpi_phdr.offset(i) };
        if phdr.p_type != libc::PT_LOAD || phdr.p_flags & libc::PF_W == 0 {
            // Read-only segments are not assumed secret; left shared.
            continue;
        }
        let prot = segment_flags_to_prot(phdr.p_flags);
        let seg_start = (info.dlpi_addr + phdr.p_vaddr) & PAGE_MASK;
        let seg_end = (seg_start + phdr.p_memsz + PAGE_SIZE - 1) & PAGE_MASK;

        let mut failure = None;
        for_each_unshared_subrange(seg_start, seg_end, &shared_ranges, |sub_start, sub_len| {
            if failure.is_some() {
                return;
            }
            probe_pages(sub_start, sub_len);
            if let Err(e) = pkey_mprotect(sub_start as *mut u8, sub_len as usize, prot, args.pkey) {
                failure = Some(e);
            }
        });
        if let Some(source) = failure {
            return Err(CompartmentInitError::SegmentProtect { index: args.pkey, source });
        }
    }
    Ok(())
}

/// `protect_tls_pages`: protects a DSO's `PT_TLS` segment except the page
/// holding `ia2_stackptr_0`, which every compartment must keep reading.
pub fn protect_tls_pages(info: &libc::dl_phdr_info, args: &mut PhdrSearchArgs, untrusted_stackptr_addr: u64) -> Result<()> {
    if !in_loaded_segment(info, args.anchor_address) {
        return Ok(());
    }
    for i in 0..info.dlpi_phnum as isize {
        // SAFETY: see `in_loaded_segment`.
        let phdr = unsafe { *info.dlpi_phdr.offset(i) };
        if phdr.p_type != libc::PT_TLS {
            continue;
        }
        let start = info.dlpi_tls_data as u64;
        let start_round_down = start & PAGE_MASK;
        let start_moved_by = start & (PAGE_SIZE - 1);
        let len_round_up = (phdr.p_memsz + start_moved_by) & PAGE_MASK;
        if len_round_up == 0 {
            continue;
        }
        let end = start_round_down + len_round_up;

        let prot = libc::PROT_READ | libc::PROT_WRITE;
        if untrusted_stackptr_addr >= start_round_down && untrusted_stackptr_addr < end {
            if untrusted_stackptr_addr > start_round_down {
                pkey_mprotect(
                    start_round_down as *mut u8,
                    (untrusted_stackptr_addr - start_round_down) as usize,
                    prot,
                    args.pkey,
                )
                .map_err(|source| CompartmentInitError::SegmentProtect { index: args.pkey, source })?;
            }
            let after_start = untrusted_stackptr_addr + PAGE_SIZE;
            if end > after_start {
                pkey_mprotect(after_start as *mut u8, (end - after_start) as usize, prot, args.pkey)
                    .map_err(|source| CompartmentInitError::SegmentProtect { index: args.pkey, source })?;
            }
        } else {
            pkey_mprotect(start_round_down as *mut u8, len_round_up as usize, prot, args.pkey)
                .map_err(|source| CompartmentInitError::SegmentProtect { index: args.pkey, source })?;
        }
    }
    Ok(())
}

/// Thin `dl_iterate_phdr` driver: calls `protect_pages` for every loaded
/// object, aborting the process on the first failure (there is no safe
/// recovery once another compartment may already see unowned pages).
pub fn run_protect_pages(args: &mut PhdrSearchArgs) -> Result<()> {
    struct Ctx<'a, 'b> {
        args: &'a mut PhdrSearchArgs<'b>,
        error: Option<CompartmentInitError>,
    }

    extern "C" fn callback(info: *mut libc::dl_phdr_info, size: usize, data: *mut c_void) -> c_int {
        if info.is_null() || data.is_null() || size == 0 {
            return 0;
        }
        // SAFETY: `dl_iterate_phdr` guarantees `info` is valid for the
        // duration of this call; `data` is the `Ctx` we passed in below.
        let ctx = unsafe { &mut *(data as *mut Ctx) };
        let info = unsafe { &*info };
        if let Err(e) = protect_pages(info, ctx.args) {
            ctx.error = Some(e);
            return 1;
        }
        0
    }

    let mut ctx = Ctx { args, error: None };
    // SAFETY: `callback` matches the signature `dl_iterate_phdr` expects,
    // and `&mut ctx` outlives the call.
    unsafe {
        dl_iterate_phdr(callback, &mut ctx as *mut Ctx as *mut c_void);
    }
    match ctx.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

extern "C" {
    fn dl_iterate_phdr(
        callback: extern "C" fn(*mut libc::dl_phdr_info, usize, *mut c_void) -> c_int,
        data: *mut c_void,
    ) -> c_int;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_libraries_prefix_matches_versioned_suffix() {
        assert!(in_extra_libraries("libfoo.so.1", Some("libfoo.so;libbar.so")));
        assert!(in_extra_libraries("libbar.so", Some("libfoo.so;libbar.so")));
        assert!(!in_extra_libraries("libbaz.so", Some("libfoo.so;libbar.so")));
    }

    #[test]
    fn extra_libraries_empty_basename_never_matches() {
        assert!(!in_extra_libraries("", Some("libfoo.so")));
    }

    #[test]
    fn unshared_subrange_splits_around_a_middle_hole() {
        let shared = [SharedRange { start: 0x2000, end: 0x3000 }];
        let mut seen = Vec::new();
        for_each_unshared_subrange(0x1000, 0x4000, &shared, |s, l| seen.push((s, l)));
        assert_eq!(seen, vec![(0x1000, 0x1000), (0x3000, 0x1000)]);
    }

    #[test]
    fn unshared_subrange_with_no_overlap_is_one_piece() {
        let shared = [SharedRange { start: 0x9000, end: 0xa000 }];
        let mut seen = Vec::new();
        for_each_unshared_subrange(0x1000, 0x2000, &shared, |s, l| seen.push((s, l)));
        assert_eq!(seen, vec![(0x1000, 0x1000)]);
    }
}
