/// One eightbyte's classification.
///
/// A `Memory` slot means that eightbyte is passed on the stack (or, for
/// returns, lives in caller-provided memory referenced via the first
/// integer argument slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SlotKind {
    Integer,
    Float,
    Memory,
}

impl SlotKind {
    /// Merge two slot kinds that land in the same eightbyte.
    ///
    /// Memory dominates; otherwise Integer dominates Float if they differ.
    pub fn merge(self, other: SlotKind) -> SlotKind {
        use SlotKind::*;
        match (self, other) {
            (Memory, _) | (_, Memory) => Memory,
            (Integer, _) | (_, Integer) => Integer,
            (Float, Float) => Float,
        }
    }
}
