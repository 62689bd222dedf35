use crate::slot::SlotKind;

/// The ABI signature of one function: its argument and return slot
/// sequences.
///
/// Invariants enforced by [`crate::classify_function`]:
/// - `ret.is_empty()` iff the function returns `void`.
/// - `ret` never has more than 2 non-`Memory` slots on x86-64 (demoted to
///   all-`Memory` otherwise).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AbiSignature {
    pub args: Vec<SlotKind>,
    pub ret: Vec<SlotKind>,
    pub variadic: bool,
}

impl AbiSignature {
    pub fn is_void_return(&self) -> bool {
        self.ret.is_empty()
    }

    /// Does the return value require caller-provided memory (i.e. is every
    /// return slot `Memory`)?
    pub fn returns_via_memory(&self) -> bool {
        !self.ret.is_empty() && self.ret.iter().all(|s| *s == SlotKind::Memory)
    }

    /// Number of eightbytes of stack space this signature's `Memory`
    /// arguments require, in order.
    pub fn stack_arg_slots(&self) -> usize {
        self.args.iter().filter(|s| **s == SlotKind::Memory).count()
    }
}
