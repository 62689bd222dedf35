/// Sentinel distinct from any valid `prot` mask. Used for regions whose
/// protection the map cannot currently vouch for (e.g. a freshly split
/// region before its prot is known).
pub const MEMORY_MAP_PROT_INDETERMINATE: u32 = u32::MAX;

/// A `mmap`/`mprotect` protection mask. Thin newtype over the raw `PROT_*`
/// bits so call sites read `Prot::READ | Prot::WRITE` rather than bare
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Prot(pub u32);

impl Prot {
    pub const NONE: Prot = Prot(0);
    pub const READ: Prot = Prot(libc::PROT_READ as u32);
    pub const WRITE: Prot = Prot(libc::PROT_WRITE as u32);
    pub const EXEC: Prot = Prot(libc::PROT_EXEC as u32);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Prot) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_indeterminate(self) -> bool {
        self.0 == MEMORY_MAP_PROT_INDETERMINATE
    }
}

impl std::ops::BitOr for Prot {
    type Output = Prot;
    fn bitor(self, rhs: Prot) -> Prot {
        Prot(self.0 | rhs.0)
    }
}
