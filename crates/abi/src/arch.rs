/// Target architecture for ABI classification.
///
/// Exactly these two are supported: Intel MPK on x86-64 and Arm MTE on
/// AArch64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Size of one "eightbyte" classification unit. Both targets use 8-byte
    /// general-purpose registers, so this is architecture-independent.
    pub const EIGHTBYTE: usize = 8;

    /// Maximum aggregate size, in bytes, passed in registers instead of
    /// memory. 16 bytes on both x86-64 (two eightbytes) and AArch64 (two
    /// X-registers, or four S-registers for an HFA).
    pub const MAX_REGISTER_AGGREGATE: usize = 16;
}
