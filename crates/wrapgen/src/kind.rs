/// The role a generated wrapper plays at its call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    /// Wraps a direct cross-compartment function call (`--wrap=<sym>`).
    Direct,
    /// Target of a function pointer taken across compartments.
    Pointer,
    /// Like `Pointer`, but the target is a `static` function: the wrapper
    /// must be emitted into the translation unit that defines it.
    PointerToStatic,
    /// An indirect call gate for one ABI signature, shared by every
    /// `IA2_CALL` expansion with that signature; the target is loaded from
    /// the process-global `ia2_fn_ptr` scratch slot.
    IndirectCallsite,
}

impl WrapperKind {
    /// Whether this wrapper reads its target from the global scratch slot
    /// rather than from a fixed symbol.
    pub fn is_indirect(self) -> bool {
        matches!(self, WrapperKind::IndirectCallsite)
    }

    /// Whether the wrapper must be emitted as a macro appended to the
    /// defining translation unit instead of the single generated
    /// assembly file.
    pub fn emit_as_macro(self) -> bool {
        matches!(self, WrapperKind::PointerToStatic)
    }
}
