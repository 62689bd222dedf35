use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemMapError {
    #[error("range [{start:#x}, {:#x}) is not page-aligned", start + len)]
    NotPageAligned { start: u64, len: u64 },

    #[error("pkey {0} exceeds the maximum of {max}", max = crate::MAX_PKEY)]
    PkeyOutOfRange(u8),
}
