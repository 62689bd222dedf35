use crate::prot::Prot;
use crate::region::Region;

/// Result of consulting the permit table for one syscall. The tracer
/// rewrites the syscall number to `-1` and the return value to `-EPERM`
/// on [`SyscallOutcome::Denied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    Permitted,
    Denied,
}

/// What kind of address-space-affecting `clone(2)` this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneKind {
    /// A new thread in the same address space: the map is shared, no
    /// change needed.
    Thread,
    /// `fork()`: the child gets a deep copy of the parent's map.
    Fork,
}

/// The authoritative memory map for one traced process.
///
/// Invariants (checked by `debug_assert!` in the mutating methods and
/// exercised as proptest properties in `ia2-testing`):
/// - all regions are pairwise disjoint;
/// - every region's start and length are page-aligned;
/// - once [`MemoryMap::init_finished`] is true, a pkey-protected region's
///   prot can only change per the `mprotect` rules below.
#[derive(Debug, Clone, Default)]
pub struct MemoryMap {
    regions: Vec<Region>,
    init_finished: bool,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn init_finished(&self) -> bool {
        self.init_finished
    }

    /// Every pair of regions is disjoint.
    pub fn is_disjoint(&self) -> bool {
        for (i, a) in self.regions.iter().enumerate() {
            for b in &self.regions[i + 1..] {
                if a.overlaps(b.start, b.len) {
                    return false;
                }
            }
        }
        true
    }

    fn overlapping(&self, start: u64, len: u64) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(move |r| r.overlaps(start, len))
    }

    /// Split every region overlapping `[start, start+len)` into the parts
    /// outside the range (kept in `self.regions`) and the parts inside
    /// (returned to the caller to drop, replace, or mutate and reinsert).
    fn carve(&mut self, start: u64, len: u64) -> Vec<Region> {
        let end = start + len;
        let mut kept = Vec::with_capacity(self.regions.len());
        let mut middles = Vec::new();
        for r in self.regions.drain(..) {
            if !r.overlaps(start, len) {
                kept.push(r);
                continue;
            }
            if r.start < start {
                kept.push(Region {
                    start: r.start,
                    len: start - r.start,
                    ..r
                });
            }
            let mid_start = r.start.max(start);
            let mid_end = r.end().min(end);
            if mid_end > mid_start {
                middles.push(Region {
                    start: mid_start,
                    len: mid_end - mid_start,
                    ..r
                });
            }
            if r.end() > end {
                kept.push(Region {
                    start: end,
                    len: r.end() - end,
                    ..r
                });
            }
        }
        self.regions = kept;
        middles
    }

    // ---------------------------------------------------------- mmap --

    /// `mmap(anon, addr=0, …)` (not `MAP_FIXED`): always permitted.
    pub fn check_mmap_anonymous(&self) -> SyscallOutcome {
        SyscallOutcome::Permitted
    }

    /// Apply the result of a permitted anonymous mmap once the kernel has
    /// chosen `start`.
    pub fn apply_mmap_anonymous(&mut self, start: u64, len: u64, prot: Prot, current_pkey: u8) {
        self.regions.push(Region {
            start,
            len,
            owner_pkey: current_pkey,
            prot,
            pkey_protected: false,
        });
        debug_assert!(self.is_disjoint());
    }

    /// `mmap(MAP_FIXED, range, prot)`: permitted iff every region
    /// overlapping `range` is owned by `current_pkey`.
    pub fn check_mmap_fixed(&self, start: u64, len: u64, current_pkey: u8) -> SyscallOutcome {
        if self.overlapping(start, len).all(|r| r.owner_pkey == current_pkey) {
            SyscallOutcome::Permitted
        } else {
            SyscallOutcome::Denied
        }
    }

    pub fn apply_mmap_fixed(&mut self, start: u64, len: u64, prot: Prot, current_pkey: u8) {
        self.carve(start, len);
        self.regions.push(Region {
            start,
            len,
            owner_pkey: current_pkey,
            prot,
            pkey_protected: false,
        });
        debug_assert!(self.is_disjoint());
    }

    // --------------------------------------------------------- munmap --

    pub fn check_munmap(&self, start: u64, len: u64, current_pkey: u8) -> SyscallOutcome {
        if self.overlapping(start, len).all(|r| r.owner_pkey == current_pkey) {
            SyscallOutcome::Permitted
        } else {
            SyscallOutcome::Denied
        }
    }

    pub fn apply_munmap(&mut self, start: u64, len: u64) {
        self.carve(start, len);
        debug_assert!(self.is_disjoint());
    }

    // -------------------------------------------------------- mremap --

    pub fn check_mremap(&self, old_start: u64, old_len: u64, current_pkey: u8) -> SyscallOutcome {
        if self
            .overlapping(old_start, old_len)
            .all(|r| r.owner_pkey == current_pkey)
        {
            SyscallOutcome::Permitted
        } else {
            SyscallOutcome::Denied
        }
    }

    pub fn apply_mremap(
        &mut self,
        old_start: u64,
        old_len: u64,
        new_start: u64,
        new_len: u64,
        prot: Prot,
        current_pkey: u8,
        dont_unmap: bool,
    ) {
        if !dont_unmap {
            self.carve(old_start, old_len);
        }
        self.regions.push(Region {
            start: new_start,
            len: new_len,
            owner_pkey: current_pkey,
            prot,
            pkey_protected: false,
        });
        debug_assert!(self.is_disjoint());
    }

    // ------------------------------------------------------ mprotect --

    /// `mprotect(range, prot)`: permitted iff every overlapping region
    /// independently satisfies at least one of the four permit
    /// conditions below.
    pub fn check_mprotect(&self, start: u64, len: u64, new_prot: Prot) -> SyscallOutcome {
        let init_finished = self.init_finished;
        let allowed = self.overlapping(start, len).all(|r| {
            !r.pkey_protected
                || !init_finished
                || r.prot.contains(Prot::WRITE)
                || r.prot == new_prot
        });
        if allowed {
            SyscallOutcome::Permitted
        } else {
            SyscallOutcome::Denied
        }
    }

    pub fn apply_mprotect(&mut self, start: u64, len: u64, new_prot: Prot) {
        let middles = self.carve(start, len);
        for mut m in middles {
            m.prot = new_prot;
            self.regions.push(m);
        }
        debug_assert!(self.is_disjoint());
    }

    // -------------------------------------------------- pkey_mprotect --

    /// `pkey_mprotect(range, prot, new_pkey)`: permitted iff every
    /// overlapping region independently satisfies (a) it was never
    /// pkey-protected and `new_pkey == current_pkey`, or (b) the caller is
    /// the untrusted compartment.
    pub fn check_pkey_mprotect(&self, start: u64, len: u64, new_pkey: u8, current_pkey: u8) -> SyscallOutcome {
        let allowed = self.overlapping(start, len).all(|r| {
            (!r.pkey_protected && new_pkey == current_pkey) || current_pkey == crate::UNTRUSTED_PKEY
        });
        if allowed {
            SyscallOutcome::Permitted
        } else {
            SyscallOutcome::Denied
        }
    }

    pub fn apply_pkey_mprotect(&mut self, start: u64, len: u64, new_prot: Prot, new_pkey: u8) {
        let middles = self.carve(start, len);
        for mut m in middles {
            m.prot = new_prot;
            m.owner_pkey = new_pkey;
            m.pkey_protected = true;
            self.regions.push(m);
        }
        debug_assert!(self.is_disjoint());
    }

    // -------------------------------------------------------- madvise --

    /// `madvise`: same pkey-owner rule as `munmap`/`mmap(FIXED)`; never
    /// changes the map.
    pub fn check_madvise(&self, start: u64, len: u64, current_pkey: u8) -> SyscallOutcome {
        self.check_munmap(start, len, current_pkey)
    }

    // --------------------------------------------------- clone / exec --

    /// `clone`: always permitted. Returns the child's map for
    /// [`CloneKind::Fork`]; `None` for [`CloneKind::Thread`] (same address
    /// space, nothing to clone).
    pub fn on_clone(&self, kind: CloneKind) -> Option<MemoryMap> {
        match kind {
            CloneKind::Thread => None,
            CloneKind::Fork => Some(self.clone()),
        }
    }

    /// `execve`: clears the map and resets `init_finished`.
    pub fn on_execve(&mut self) {
        self.regions.clear();
        self.init_finished = false;
    }

    // --------------------------------------------------------- signpost --

    /// The child's `mmap(MAP_FIXED, addr=0x1a21face1a21face, …)` signpost.
    /// The syscall itself always returns `EINVAL`;
    /// this only flips `init_finished` the first time it is observed.
    /// Returns whether this call was in fact the signpost.
    pub fn try_mark_init_finished(&mut self, addr: u64) -> bool {
        if addr == crate::INIT_FINISHED_SIGNPOST_ADDR {
            self.init_finished = true;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const PAGE: u64 = crate::PAGE_SIZE;

    #[test]
    fn anon_mmap_is_always_permitted_and_owned_by_caller() {
        let mut map = MemoryMap::new();
        assert_eq!(map.check_mmap_anonymous(), SyscallOutcome::Permitted);
        map.apply_mmap_anonymous(PAGE, PAGE, Prot::READ | Prot::WRITE, 3);
        assert_eq!(map.regions().len(), 1);
        assert_eq!(map.regions()[0].owner_pkey, 3);
    }

    #[test]
    fn mmap_fixed_denied_over_other_compartment_memory() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(PAGE, PAGE, Prot::READ | Prot::WRITE, 1);
        assert_eq!(map.check_mmap_fixed(PAGE, PAGE, 2), SyscallOutcome::Denied);
        assert_eq!(map.check_mmap_fixed(PAGE, PAGE, 1), SyscallOutcome::Permitted);
    }

    #[test]
    fn munmap_denied_across_compartment_boundary() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, PAGE, Prot::READ, 1);
        map.apply_mmap_anonymous(PAGE, PAGE, Prot::READ, 2);
        assert_eq!(map.check_munmap(0, 2 * PAGE, 1), SyscallOutcome::Denied);
    }

    #[test]
    fn munmap_splits_the_owning_region() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, 3 * PAGE, Prot::READ, 1);
        map.apply_munmap(PAGE, PAGE);
        assert_eq!(map.regions().len(), 2);
        assert!(map.is_disjoint());
        assert!(map.regions().iter().any(|r| r.start == 0 && r.len == PAGE));
        assert!(map
            .regions()
            .iter()
            .any(|r| r.start == 2 * PAGE && r.len == PAGE));
    }

    #[test]
    fn mprotect_denied_once_init_finished_on_pkey_protected_readonly_region() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, PAGE, Prot::READ, 1);
        map.apply_pkey_mprotect(0, PAGE, Prot::READ, 4);
        map.try_mark_init_finished(crate::INIT_FINISHED_SIGNPOST_ADDR);
        assert!(map.init_finished());
        // Same prot requested: permitted (condition d).
        assert_eq!(map.check_mprotect(0, PAGE, Prot::READ), SyscallOutcome::Permitted);
        // Escalating to writable on a pkey-protected, non-writable, already-finished
        // region is denied.
        assert_eq!(
            map.check_mprotect(0, PAGE, Prot::READ | Prot::WRITE),
            SyscallOutcome::Denied
        );
    }

    #[test]
    fn mprotect_before_init_finished_is_unconditionally_permitted() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, PAGE, Prot::READ, 1);
        map.apply_pkey_mprotect(0, PAGE, Prot::READ, 4);
        assert!(!map.init_finished());
        assert_eq!(
            map.check_mprotect(0, PAGE, Prot::READ | Prot::WRITE | Prot::EXEC),
            SyscallOutcome::Permitted
        );
    }

    #[test]
    fn pkey_mprotect_denied_to_retag_someone_elses_region() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, PAGE, Prot::READ, 1);
        map.apply_pkey_mprotect(0, PAGE, Prot::READ, 4);
        assert_eq!(
            map.check_pkey_mprotect(0, PAGE, 5, 2),
            SyscallOutcome::Denied
        );
        assert_eq!(
            map.check_pkey_mprotect(0, PAGE, 5, crate::UNTRUSTED_PKEY),
            SyscallOutcome::Permitted
        );
    }

    #[test]
    fn fork_clones_the_map_thread_does_not() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, PAGE, Prot::READ, 1);
        assert!(map.on_clone(CloneKind::Thread).is_none());
        let child = map.on_clone(CloneKind::Fork).expect("fork clones");
        assert_eq!(child.regions(), map.regions());
    }

    #[test]
    fn execve_resets_the_map() {
        let mut map = MemoryMap::new();
        map.apply_mmap_anonymous(0, PAGE, Prot::READ, 1);
        map.try_mark_init_finished(crate::INIT_FINISHED_SIGNPOST_ADDR);
        map.on_execve();
        assert!(map.regions().is_empty());
        assert!(!map.init_finished());
    }

    #[test]
    fn only_the_exact_signpost_address_flips_init_finished() {
        let mut map = MemoryMap::new();
        assert!(!map.try_mark_init_finished(0x1000));
        assert!(!map.init_finished());
        assert!(map.try_mark_init_finished(crate::INIT_FINISHED_SIGNPOST_ADDR));
        assert!(map.init_finished());
    }

    proptest! {
        /// Any sequence of anonymous mmaps and munmaps by regions' own
        /// owners leaves the map disjoint.
        #[test]
        fn disjoint_after_random_mmap_munmap(
            ops in prop::collection::vec((any::<bool>(), 0u64..8, 0u64..4, 0u8..4), 1..30)
        ) {
            let mut map = MemoryMap::new();
            for (is_mmap, start_page, len_pages, pkey) in ops {
                let start = start_page * PAGE;
                let len = (len_pages.max(1)) * PAGE;
                if is_mmap {
                    if map.check_mmap_fixed(start, len, pkey) == SyscallOutcome::Permitted {
                        map.apply_mmap_fixed(start, len, Prot::READ, pkey);
                    }
                } else if map.check_munmap(start, len, pkey) == SyscallOutcome::Permitted {
                    map.apply_munmap(start, len);
                }
                prop_assert!(map.is_disjoint());
            }
        }
    }
}
