//! Scenarios 3-5 (`spec.md` §8) as direct tests of [`ia2_memmap::MemoryMap`]
//! and `ia2_tracer::pkey`'s PKRU canonicalization, grounded in
//! `ia2_memmap`'s own `check_*`/`apply_*` pairs: `ia2_tracer::supervisor`'s
//! `permit`/`apply` functions are private wiring around these same calls,
//! so the policy itself is exercised here rather than through the
//! ptrace/seccomp plumbing (which needs a live traced process to run at
//! all).

#[cfg(test)]
mod tests {
    use ia2_memmap::{CloneKind, MemoryMap, Prot, SyscallOutcome, UNTRUSTED_PKEY};
    use ia2_tracer::pkey::pkey_for_pkru;

    const PAGE: u64 = ia2_memmap::PAGE_SIZE;

    fn map_with_one_region(pkey: u8, prot: Prot) -> MemoryMap {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(PAGE, PAGE, prot, pkey);
        map
    }

    /// Scenario 3: a region's first `pkey_mprotect` is permitted, but a
    /// second call attempting to hand the same region to a *different*
    /// pkey is denied — a compartment cannot steal another's memory by
    /// re-tagging it.
    #[test]
    fn scenario_3_pkey_mprotect_denies_reassignment_to_another_compartment() {
        let mut map = map_with_one_region(1, Prot::READ | Prot::WRITE);
        assert_eq!(
            map.check_pkey_mprotect(PAGE, PAGE, 1, 1),
            SyscallOutcome::Permitted
        );
        map.apply_pkey_mprotect(PAGE, PAGE, Prot::READ | Prot::WRITE, 1);

        // Compartment 2 now tries to claim the same range for itself.
        assert_eq!(
            map.check_pkey_mprotect(PAGE, PAGE, 2, 2),
            SyscallOutcome::Denied
        );
    }

    /// Scenario 3, untrusted-compartment escape hatch: the untrusted
    /// compartment (pkey 0) may `pkey_mprotect` any region regardless of
    /// its current owner, since it owns no protected memory of its own to
    /// defend.
    #[test]
    fn scenario_3_untrusted_compartment_bypasses_the_ownership_check() {
        let map = map_with_one_region(1, Prot::READ | Prot::WRITE);
        assert_eq!(
            map.check_pkey_mprotect(PAGE, PAGE, 5, UNTRUSTED_PKEY),
            SyscallOutcome::Permitted
        );
    }

    /// Scenario 4: `fork()` clones the memory map so the child's policy
    /// state is independent of the parent's from that point on.
    #[test]
    fn scenario_4_fork_clones_the_map_independently_of_the_parent() {
        let parent = map_with_one_region(1, Prot::READ | Prot::WRITE);
        assert!(parent.on_clone(CloneKind::Thread).is_none());

        let mut child = parent.on_clone(CloneKind::Fork).expect("fork clones the map");
        assert_eq!(child.regions(), parent.regions());

        child.apply_munmap(PAGE, PAGE);
        assert!(child.regions().is_empty());
        assert_eq!(parent.regions().len(), 1, "parent's map must be unaffected");
    }

    /// Scenario 5: before `init_finished`, a pkey-protected region may have
    /// its protection bits changed freely (the initializer is still
    /// setting things up); once the signpost fires, the same change is
    /// denied unless the region is still writable or the new protection is
    /// unchanged.
    #[test]
    fn scenario_5_init_finished_gates_further_mprotect_of_protected_pages() {
        let mut map = map_with_one_region(1, Prot::READ | Prot::WRITE);
        map.apply_pkey_mprotect(PAGE, PAGE, Prot::READ | Prot::WRITE, 1);
        assert!(!map.init_finished());

        // Still mid-initialization: flipping to read-only is permitted.
        assert_eq!(
            map.check_mprotect(PAGE, PAGE, Prot::READ),
            SyscallOutcome::Permitted
        );
        map.apply_mprotect(PAGE, PAGE, Prot::READ);

        assert!(map.try_mark_init_finished(ia2_memmap::INIT_FINISHED_SIGNPOST_ADDR));
        assert!(map.init_finished());

        // Post-init: the region is read-only (no WRITE) and pkey-protected,
        // so narrowing it further to NONE is denied.
        assert_eq!(
            map.check_mprotect(PAGE, PAGE, Prot::NONE),
            SyscallOutcome::Denied
        );
        // Requesting the same prot it already has is always permitted.
        assert_eq!(
            map.check_mprotect(PAGE, PAGE, Prot::READ),
            SyscallOutcome::Permitted
        );
    }

    /// `spec.md` §9 Open Question: glibc's non-canonical startup PKRU
    /// values (before the first real `wrpkru`) must resolve to pkey 0
    /// rather than [`ia2_tracer::pkey`]'s invalid-pkey sentinel.
    #[test]
    fn glibc_startup_pkru_values_canonicalize_to_pkey_zero() {
        assert_eq!(pkey_for_pkru(0x5555_5550), 0);
        assert_eq!(pkey_for_pkru(0x5555_5554), 0);
        assert_eq!(pkey_for_pkru(0), 0);
    }

    /// A region never touched by `pkey_mprotect` is not `pkey_protected`,
    /// so `mmap(MAP_FIXED)`/`munmap` ownership rules (not the pkey rules)
    /// govern it: a different compartment overlapping it is still denied
    /// by the plain ownership check.
    #[test]
    fn unprotected_region_still_enforces_owner_only_munmap() {
        let map = map_with_one_region(1, Prot::READ | Prot::WRITE);
        assert_eq!(
            map.check_munmap(PAGE, PAGE, 2),
            SyscallOutcome::Denied
        );
        assert_eq!(
            map.check_munmap(PAGE, PAGE, 1),
            SyscallOutcome::Permitted
        );
    }
}
