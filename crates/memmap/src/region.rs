use crate::prot::Prot;

/// One mapped, page-aligned, half-open range `[start, start+len)` and its
/// ownership metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Region {
    pub start: u64,
    pub len: u64,
    pub owner_pkey: u8,
    pub prot: Prot,
    /// `false` marks pages that have been mapped but never assigned an
    /// owner via `pkey_mprotect`.
    pub pkey_protected: bool,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Overlap test, inclusive at one end so that adjacent ranges
    /// (`end == other.start`) are non-overlapping.
    pub fn overlaps(&self, start: u64, len: u64) -> bool {
        let other_end = start + len;
        self.start < other_end && start < self.end()
    }

    pub fn contains_point(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }
}
