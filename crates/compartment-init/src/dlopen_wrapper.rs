//! Wrapped `dlopen`/`dlmopen` family, ported from
//! `original_source/runtime/libia2/dlopen_wrapper.c`. `protect_pages` only
//! runs once, at constructor time, so any loader/libc DSO pulled in later
//! via `dlopen` would otherwise keep its default (untrusted) pkey forever.
//! These wrappers retag such DSOs into the loader's compartment right
//! after the real call returns.
//!
//! Installed the same way as a call gate: link the caller-side object
//! with `--wrap=dlopen` (etc.), which this crate's symbols satisfy.

use std::ffi::{c_char, c_int, c_void, CStr};

use crate::protect_pages::PhdrSearchArgs;

/// Loader/libc DSO basename prefixes retagged into the loader compartment,
/// per `is_loader_dso`.
const LOADER_DSO_PREFIXES: &[&str] = &[
    "ld-linux",
    "libc.so",
    "libc-",
    "libpthread",
    "libdl.so",
    "librt.so",
    "libm.so",
];

fn is_loader_dso(basename: &str) -> bool {
    !basename.is_empty() && LOADER_DSO_PREFIXES.iter().any(|p| basename.starts_with(p))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Re-tags `handle`'s writable segments into `loader_pkey` if it names a
/// loader/libc DSO; leaves application libraries alone so their original
/// per-file pkey assignment survives a later `dlopen`.
///
/// # Safety
/// `handle` must be a live handle just returned by `dlopen`/`dlmopen`
/// (or a null/`RTLD_DEFAULT`/`RTLD_NEXT` pseudo-handle, which is a no-op).
pub unsafe fn retag_loaded_dso(handle: *mut c_void, loader_pkey: u8) {
    if handle.is_null() {
        return;
    }

    let mut link_map: *mut c_void = std::ptr::null_mut();
    const RTLD_DI_LINKMAP: c_int = 2;
    let rc = libc::dlinfo(handle, RTLD_DI_LINKMAP, &mut link_map as *mut _ as *mut c_void);
    if rc != 0 || link_map.is_null() {
        tracing::warn!(?handle, "dlinfo(RTLD_DI_LINKMAP) failed; skipping dlopen retag");
        return;
    }

    // `struct link_map`'s first field is `l_addr`, the second `l_name`
    // (`char *`); both glibc and musl keep this layout stable for ABI
    // compatibility with `_dl_debug_state` consumers.
    #[repr(C)]
    struct LinkMapHeader {
        l_addr: usize,
        l_name: *const c_char,
    }
    let header = &*(link_map as *const LinkMapHeader);
    let dso_name = if header.l_name.is_null() {
        String::new()
    } else {
        CStr::from_ptr(header.l_name).to_string_lossy().into_owned()
    };

    if !is_loader_dso(basename(&dso_name)) {
        return;
    }

    tracing::info!(dso = %dso_name, pkey = loader_pkey, "retagging loader DSO to loader compartment");
    let mut args = PhdrSearchArgs {
        pkey: loader_pkey,
        anchor_address: header.l_addr,
        extra_libraries: None,
        shared_sections: &[],
        found_library_count: 0,
    };
    // `run_protect_pages` re-walks `dl_iterate_phdr` and `protect_pages`
    // only acts on the entry matching `anchor_address`, so this reaches
    // exactly the DSO `dlinfo` just identified.
    if let Err(e) = crate::protect_pages::run_protect_pages(&mut args) {
        tracing::error!(dso = %dso_name, error = %e, "failed to retag loader DSO; aborting");
        std::process::abort();
    }
}

/// The loader compartment's pkey, set once by `INIT_RUNTIME` before any
/// `dlopen` call can race it. Defaults to 1, matching
/// `ia2_loader_compartment` in the original runtime.
static LOADER_PKEY: std::sync::atomic::AtomicU8 = std::sync::atomic::AtomicU8::new(1);

/// Sets the loader compartment's pkey; called once from the generated
/// `INIT_RUNTIME` constructor.
pub fn set_loader_pkey(pkey: u8) {
    LOADER_PKEY.store(pkey, std::sync::atomic::Ordering::Relaxed);
}

extern "C" {
    fn __real_dlopen(filename: *const c_char, flags: c_int) -> *mut c_void;
    fn __real_dlmopen(lmid: libc::c_long, filename: *const c_char, flags: c_int) -> *mut c_void;
    fn __real_dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
    fn __real_dlclose(handle: *mut c_void) -> c_int;
}

/// `--wrap=dlopen` target: calls the real `dlopen`, then retags the
/// result if it names a loader/libc DSO.
///
/// # Safety
/// Same preconditions as libc's `dlopen`.
#[no_mangle]
pub unsafe extern "C" fn __wrap_dlopen(filename: *const c_char, flags: c_int) -> *mut c_void {
    let handle = __real_dlopen(filename, flags);
    retag_loaded_dso(handle, LOADER_PKEY.load(std::sync::atomic::Ordering::Relaxed));
    handle
}

/// `--wrap=dlmopen` target; same retagging as [`__wrap_dlopen`].
///
/// # Safety
/// Same preconditions as libc's `dlmopen`.
#[no_mangle]
pub unsafe extern "C" fn __wrap_dlmopen(lmid: libc::c_long, filename: *const c_char, flags: c_int) -> *mut c_void {
    let handle = __real_dlmopen(lmid, filename, flags);
    retag_loaded_dso(handle, LOADER_PKEY.load(std::sync::atomic::Ordering::Relaxed));
    handle
}

/// `--wrap=dlsym` target. `dlsym` itself never maps new pages, so no
/// retagging is needed; this exists only so every `dl*` entry point in the
/// guarded program resolves through a consistent, interposable symbol.
///
/// # Safety
/// Same preconditions as libc's `dlsym`.
#[no_mangle]
pub unsafe extern "C" fn __wrap_dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
    __real_dlsym(handle, symbol)
}

/// `--wrap=dlclose` target; no memory-map bookkeeping is needed here
/// because the tracer observes the resulting `munmap`s directly.
///
/// # Safety
/// Same preconditions as libc's `dlclose`.
#[no_mangle]
pub unsafe extern "C" fn __wrap_dlclose(handle: *mut c_void) -> c_int {
    __real_dlclose(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_versioned_libc_and_loader_names() {
        assert!(is_loader_dso("ld-linux-x86-64.so.2"));
        assert!(is_loader_dso("libc.so.6"));
        assert!(is_loader_dso("libc-2.35.so"));
        assert!(is_loader_dso("libpthread.so.0"));
    }

    #[test]
    fn application_libraries_are_not_loader_dsos() {
        assert!(!is_loader_dso("libapp_compartment2.so"));
        assert!(!is_loader_dso(""));
    }

    #[test]
    fn basename_strips_directory_components() {
        assert_eq!(basename("/usr/lib/x86_64-linux-gnu/libc.so.6"), "libc.so.6");
        assert_eq!(basename("libc.so.6"), "libc.so.6");
    }
}
