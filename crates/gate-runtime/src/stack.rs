//! Per-thread, per-compartment stack-pointer slots (`ia2_stackptr_<pkey>`).
//!
//! Wrapper assembly reaches these through the raw extern symbols at the
//! bottom of this file; ordinary Rust callers (the compartment initializer,
//! tests) go through [`stackptr_slot`] / [`set_stack_top`] /
//! [`stack_top`].

use std::cell::Cell;

use ia2_memmap::MAX_PKEY;

/// One past the highest pkey MPK allows; matches `IA2_MAX_COMPARTMENTS`.
pub const MAX_COMPARTMENTS: usize = MAX_PKEY as usize + 1;

thread_local! {
    static STACKPTRS: [Cell<*mut u8>; MAX_COMPARTMENTS] = const {
        [const { Cell::new(std::ptr::null_mut()) }; MAX_COMPARTMENTS]
    };
}

/// Reads this thread's current top-of-stack for compartment `pkey`, or
/// `None` if nothing has been allocated yet.
pub fn stack_top(pkey: u8) -> Option<*mut u8> {
    STACKPTRS.with(|slots| {
        let ptr = slots[pkey as usize].get();
        if ptr.is_null() {
            None
        } else {
            Some(ptr)
        }
    })
}

/// Stores the top-of-stack for compartment `pkey` on this thread. Called
/// once per thread per compartment by the compartment initializer.
pub fn set_stack_top(pkey: u8, top: *mut u8) {
    STACKPTRS.with(|slots| slots[pkey as usize].set(top));
}

/// The gate trampoline's view of a stack slot: a raw pointer to the cell
/// holding the top-of-stack, suitable for loading into `%rsp`/`sp`
/// directly from assembly.
///
/// # Safety
/// The returned pointer is only valid for the lifetime of the calling
/// thread and must only be dereferenced from that same thread.
pub unsafe fn stackptr_slot(pkey: u8) -> *mut *mut u8 {
    STACKPTRS.with(|slots| slots[pkey as usize].as_ptr())
}

/// `void **ia2_stackptr_for_tag(size_t tag)` — the symbol wrapper assembly
/// and `ia2_thread_begin` call to find the stack slot for the compartment
/// identified by `tag` (the PKRU-derived pkey on x86, the `x18` tag byte on
/// AArch64).
///
/// # Safety
/// Must be called with `tag < MAX_COMPARTMENTS`; the returned pointer is
/// thread-local and must not cross threads.
#[no_mangle]
pub unsafe extern "C" fn ia2_stackptr_for_tag(tag: usize) -> *mut *mut u8 {
    debug_assert!(tag < MAX_COMPARTMENTS, "tag {tag} out of range");
    stackptr_slot(tag as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_start_empty_and_round_trip() {
        assert_eq!(stack_top(3), None);
        let mut scratch = [0u8; 16];
        set_stack_top(3, scratch.as_mut_ptr());
        assert_eq!(stack_top(3), Some(scratch.as_mut_ptr()));
    }

    #[test]
    fn slots_are_independent_per_compartment() {
        let mut a = [0u8; 4];
        let mut b = [1u8; 4];
        set_stack_top(1, a.as_mut_ptr());
        set_stack_top(2, b.as_mut_ptr());
        assert_eq!(stack_top(1), Some(a.as_mut_ptr()));
        assert_eq!(stack_top(2), Some(b.as_mut_ptr()));
    }
}
