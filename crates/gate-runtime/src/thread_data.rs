//! `struct ia2_thread_data` equivalent: a process-wide, lock-protected
//! registry of each thread's per-compartment stack addresses, keyed by tid
//! so [`crate::addr_location::locate_address`] can answer queries made from
//! a different thread than the one that owns the stack.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::stack::MAX_COMPARTMENTS;

/// Addresses of each compartment's stack for one thread. Shared data: not
/// safe to dereference as a pointer, only to compare as a provenance-less
/// address (mirrors the C struct's own doc comment).
#[derive(Debug, Clone, Copy)]
pub struct ThreadData {
    pub stack_addrs: [usize; MAX_COMPARTMENTS],
}

impl Default for ThreadData {
    fn default() -> Self {
        ThreadData {
            stack_addrs: [0; MAX_COMPARTMENTS],
        }
    }
}

static REGISTRY: Lazy<Mutex<HashMap<i32, ThreadData>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn current_tid() -> i32 {
    // SAFETY: gettid() takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Finds (adding, but never allocating beyond the registry entry itself)
/// the current thread's [`ThreadData`], recording `top` for `pkey`.
pub fn record_stack(pkey: u8, top: *mut u8) {
    let tid = current_tid();
    let mut registry = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    let entry = registry.entry(tid).or_default();
    entry.stack_addrs[pkey as usize] = top as usize;
}

/// Snapshot of every thread's [`ThreadData`] currently registered, keyed by
/// tid. Used by `locate_address` and by `log_memory_maps` to annotate
/// `/proc/self/maps` with which compartment's stack owns a range.
pub fn snapshot() -> HashMap<i32, ThreadData> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stack_is_visible_in_snapshot() {
        let mut scratch = [0u8; 8];
        record_stack(2, scratch.as_mut_ptr());
        let snap = snapshot();
        let tid = current_tid();
        assert_eq!(snap[&tid].stack_addrs[2], scratch.as_mut_ptr() as usize);
    }
}
