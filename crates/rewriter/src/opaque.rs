//! Opaque function-pointer type registry: two function
//! pointers share an opaque type iff their canonical C types are
//! identical, keyed here by the mangled signature string
//! ([`crate::types::ResolvedType::mangle`]).

use std::collections::BTreeMap;

use crate::types::ResolvedType;

pub const OPAQUE_STRUCT_PREFIX: &str = "IA2_fnptr_";

/// One interned opaque function-pointer type: `struct IA2_fnptr_<mangled>
/// { void *ptr; };` plus the original spelling used for the `IA2_TYPE_<m>`
/// alias macro.
#[derive(Debug, Clone)]
pub struct OpaqueFnPtrType {
    pub mangled: String,
    pub original_spelling: String,
}

impl OpaqueFnPtrType {
    pub fn struct_name(&self) -> String {
        format!("{OPAQUE_STRUCT_PREFIX}{}", self.mangled)
    }
}

/// Interns opaque function-pointer types by mangled signature, in first-seen
/// order (so generated output is deterministic across identical inputs).
#[derive(Debug, Default)]
pub struct OpaqueRegistry {
    by_mangle: BTreeMap<String, OpaqueFnPtrType>,
    order: Vec<String>,
}

impl OpaqueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern the function-pointer canonical type `fn_ty`, returning the
    /// mangled key to use in `IA2_fnptr_<mangled>` / `IA2_CALL(ptr, <key>)`.
    pub fn intern(&mut self, fn_ty: &ResolvedType, original_spelling: &str) -> String {
        let mangled = fn_ty.mangle();
        if !self.by_mangle.contains_key(&mangled) {
            self.by_mangle.insert(
                mangled.clone(),
                OpaqueFnPtrType {
                    mangled: mangled.clone(),
                    original_spelling: original_spelling.to_string(),
                },
            );
            self.order.push(mangled.clone());
        }
        mangled
    }

    pub fn iter_in_order(&self) -> impl Iterator<Item = &OpaqueFnPtrType> {
        self.order.iter().filter_map(move |m| self.by_mangle.get(m))
    }

    pub fn get(&self, mangled: &str) -> Option<&OpaqueFnPtrType> {
        self.by_mangle.get(mangled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_signatures_share_one_entry() {
        let mut reg = OpaqueRegistry::new();
        let ty = ResolvedType::Pointer(Box::new(ResolvedType::Function {
            ret: Box::new(ResolvedType::Int),
            params: vec![ResolvedType::Int],
            variadic: false,
        }));
        let a = reg.intern(&ty, "int (*)(int)");
        let b = reg.intern(&ty, "int (*)(int)");
        assert_eq!(a, b);
        assert_eq!(reg.iter_in_order().count(), 1);
    }

    #[test]
    fn different_signatures_get_distinct_entries() {
        let mut reg = OpaqueRegistry::new();
        let a_ty = ResolvedType::Pointer(Box::new(ResolvedType::Function {
            ret: Box::new(ResolvedType::Int),
            params: vec![],
            variadic: false,
        }));
        let b_ty = ResolvedType::Pointer(Box::new(ResolvedType::Function {
            ret: Box::new(ResolvedType::Void),
            params: vec![],
            variadic: false,
        }));
        let a = reg.intern(&a_ty, "int (*)(void)");
        let b = reg.intern(&b_ty, "void (*)(void)");
        assert_ne!(a, b);
    }
}
