//! `ia2_addr_location` equivalent: a best-effort "what owns this address"
//! lookup used by debugging tooling (`log_memory_maps` in the compartment
//! initializer).

use crate::thread_data;

/// Descriptive answer to "what is at this address". Every field is `None`
/// when the lookup comes up empty, mirroring the C struct's `NULL`/`-1`
/// sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrLocation {
    pub name: Option<&'static str>,
    pub tid: Option<i32>,
    pub compartment: Option<u8>,
}

impl AddrLocation {
    fn unknown() -> Self {
        AddrLocation {
            name: None,
            tid: None,
            compartment: None,
        }
    }
}

/// Finds the `{name, tid, compartment}` of `addr` by scanning every
/// registered thread's known stack top addresses. Only recognizes stacks;
/// heap and code ranges are out of scope (`log_memory_maps` falls back to
/// the raw `/proc/self/maps` line for those).
pub fn locate_address(addr: usize) -> AddrLocation {
    for (tid, data) in thread_data::snapshot() {
        for (pkey, &top) in data.stack_addrs.iter().enumerate() {
            if top == 0 {
                continue;
            }
            // Stacks grow down from `top`; treat the 4 MiB region below
            // the recorded top as "this compartment's stack" for the
            // purposes of a best-effort lookup.
            const STACK_SIZE: usize = 4 * 1024 * 1024;
            let base = top.saturating_sub(STACK_SIZE);
            if addr >= base && addr <= top {
                return AddrLocation {
                    name: Some("stack"),
                    tid: Some(tid),
                    compartment: Some(pkey as u8),
                };
            }
        }
    }
    AddrLocation::unknown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_data::record_stack;

    #[test]
    fn unregistered_address_is_unknown() {
        assert_eq!(locate_address(0xdead_beef), AddrLocation::unknown());
    }

    #[test]
    fn address_inside_a_recorded_stack_resolves() {
        let mut scratch = [0u8; 64];
        let top = scratch.as_mut_ptr() as usize + scratch.len();
        record_stack(4, top as *mut u8);
        let found = locate_address(top - 1);
        assert_eq!(found.name, Some("stack"));
        assert_eq!(found.compartment, Some(4));
    }
}
