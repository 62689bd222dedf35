//! `FnDecl` pass: for every function declaration or definition, record
//! its ABI signature and which pkey's `declared_fns`
//! / `defined_fns` set it appears in. A function is cross-compartment iff
//! some pkey declares it without defining it.

use std::collections::{BTreeMap, BTreeSet};

use lang_c::ast;
use lang_c::driver::Parse;

use ia2_abi::{Arch, AbiSignature};

use crate::error::{Result, RewriterError};
use crate::types::{apply_derived, resolve_specifiers, ResolvedType, TypedefTable};

/// One function prototype observed while walking a translation unit.
#[derive(Debug, Clone)]
pub struct FnProto {
    pub name: String,
    pub signature: Option<AbiSignature>,
    pub is_definition: bool,
    pub is_static: bool,
    pub skip_wrap: bool,
}

/// Builtins and attribute-marked functions the `FnDecl` pass excludes from
/// call-gate generation.
fn is_excluded(name: &str, skip_wrap: bool, variadic: bool) -> bool {
    skip_wrap || variadic || name.starts_with("__builtin_")
}

/// Walk one parsed translation unit's top-level declarations, extracting a
/// [`FnProto`] for every function declared or defined at file scope.
pub fn scan_translation_unit(parse: &Parse, arch: Arch) -> Result<Vec<FnProto>> {
    let mut typedefs = TypedefTable::new();
    let mut out = Vec::new();

    for ext in &parse.unit.0 {
        match &ext.node {
            ast::ExternalDeclaration::Declaration(decl) => {
                record_typedefs(&decl.node, &mut typedefs);
                out.extend(scan_declaration(&decl.node, &typedefs, arch)?);
            }
            ast::ExternalDeclaration::FunctionDefinition(def) => {
                if let Some(proto) = scan_function_definition(&def.node, &typedefs, arch)? {
                    out.push(proto);
                }
            }
            ast::ExternalDeclaration::StaticAssert(_) => {}
        }
    }
    Ok(out)
}

pub(crate) fn record_typedefs(decl: &ast::Declaration, typedefs: &mut TypedefTable) {
    let is_typedef = decl.specifiers.iter().any(|s| {
        matches!(
            s.node,
            ast::DeclarationSpecifier::StorageClass(ref sc)
                if matches!(sc.node, ast::StorageClassSpecifier::Typedef)
        )
    });
    if !is_typedef {
        return;
    }
    let base = resolve_specifiers(&decl.specifiers, typedefs);
    for init in &decl.declarators {
        let (ty, name) = apply_derived(base.clone(), &init.node.declarator.node, typedefs);
        if let Some(name) = name {
            typedefs.insert(name, ty);
        }
    }
}

fn scan_declaration(
    decl: &ast::Declaration,
    typedefs: &TypedefTable,
    arch: Arch,
) -> Result<Vec<FnProto>> {
    let is_typedef = decl.specifiers.iter().any(|s| {
        matches!(
            s.node,
            ast::DeclarationSpecifier::StorageClass(ref sc)
                if matches!(sc.node, ast::StorageClassSpecifier::Typedef)
        )
    });
    if is_typedef {
        return Ok(Vec::new());
    }

    let is_static = decl.specifiers.iter().any(|s| {
        matches!(
            s.node,
            ast::DeclarationSpecifier::StorageClass(ref sc)
                if matches!(sc.node, ast::StorageClassSpecifier::Static)
        )
    });
    let skip_wrap = has_skip_wrap_attribute(decl);
    let base = resolve_specifiers(&decl.specifiers, typedefs);

    let mut out = Vec::new();
    for init in &decl.declarators {
        let (ty, name) = apply_derived(base.clone(), &init.node.declarator.node, typedefs);
        let Some(name) = name else { continue };
        let ResolvedType::Function { ret, params, variadic } = ty else {
            continue;
        };
        let signature = build_signature(&ret, &params, variadic, arch, skip_wrap)?;
        out.push(FnProto {
            name,
            signature,
            is_definition: false,
            is_static,
            skip_wrap,
        });
    }
    Ok(out)
}

fn scan_function_definition(
    def: &ast::FunctionDefinition,
    typedefs: &TypedefTable,
    arch: Arch,
) -> Result<Option<FnProto>> {
    let is_static = def.specifiers.iter().any(|s| {
        matches!(
            s.node,
            ast::DeclarationSpecifier::StorageClass(ref sc)
                if matches!(sc.node, ast::StorageClassSpecifier::Static)
        )
    });
    let base = resolve_specifiers(&def.specifiers, typedefs);
    let (ty, name) = apply_derived(base, &def.declarator.node, typedefs);
    let Some(name) = name else { return Ok(None) };
    let ResolvedType::Function { ret, params, variadic } = ty else {
        return Ok(None);
    };
    let signature = build_signature(&ret, &params, variadic, arch, false)?;
    Ok(Some(FnProto {
        name,
        signature,
        is_definition: true,
        is_static,
        skip_wrap: false,
    }))
}

fn build_signature(
    ret: &ResolvedType,
    params: &[ResolvedType],
    variadic: bool,
    arch: Arch,
    skip_wrap: bool,
) -> Result<Option<AbiSignature>> {
    if skip_wrap {
        return Ok(None);
    }
    let arg_ctypes: Vec<_> = params.iter().map(ResolvedType::to_ctype).collect();
    let ret_ctype = ret.to_ctype();
    Ok(Some(ia2_abi::classify_function(
        &arg_ctypes,
        &ret_ctype,
        variadic,
        arch,
    )?))
}

fn has_skip_wrap_attribute(decl: &ast::Declaration) -> bool {
    decl.declarators.iter().any(|d| {
        d.node
            .declarator
            .node
            .extensions
            .iter()
            .any(attribute_is_skip_wrap)
    })
}

fn attribute_is_skip_wrap(ext: &lang_c::span::Node<ast::Extension>) -> bool {
    matches!(
        &ext.node,
        ast::Extension::Attribute(attr) if attr.name.node == "ia2_skip_wrap"
    )
}

/// Cross-compartment analysis across every translation unit in the build.
#[derive(Debug, Default)]
pub struct CrossCompartmentAnalysis {
    /// pkeys that declare (but may not define) each function name.
    declared: BTreeMap<String, BTreeSet<u8>>,
    /// the single pkey that defines each function name, if any.
    defined: BTreeMap<String, u8>,
    signatures: BTreeMap<String, AbiSignature>,
}

impl CrossCompartmentAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, pkey: u8, protos: &[FnProto]) -> Result<()> {
        for proto in protos {
            if is_excluded(&proto.name, proto.skip_wrap, false) {
                continue;
            }
            if let Some(sig) = &proto.signature {
                self.signatures.entry(proto.name.clone()).or_insert_with(|| sig.clone());
            }
            self.declared.entry(proto.name.clone()).or_default().insert(pkey);
            if proto.is_definition {
                if let Some(existing) = self.defined.get(&proto.name) {
                    if *existing != pkey {
                        return Err(RewriterError::MultipleDefinitions {
                            name: proto.name.clone(),
                            first: *existing,
                            second: pkey,
                        });
                    }
                }
                self.defined.insert(proto.name.clone(), pkey);
            }
        }
        Ok(())
    }

    /// `(caller_pkey, function_name, target_pkey, signature)` for every
    /// cross-compartment direct call this build observed: a function
    /// defined in `target_pkey` and declared (used) without a local
    /// definition in `caller_pkey`.
    pub fn cross_compartment_calls(&self) -> Vec<(u8, String, u8, AbiSignature)> {
        let mut out = Vec::new();
        for (name, pkeys) in &self.declared {
            let Some(&target) = self.defined.get(name) else {
                continue;
            };
            let Some(sig) = self.signatures.get(name) else {
                continue;
            };
            for &caller in pkeys {
                if caller != target {
                    out.push((caller, name.clone(), target, sig.clone()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ia2_abi::SlotKind;

    fn sig() -> AbiSignature {
        AbiSignature {
            args: vec![SlotKind::Integer],
            ret: vec![],
            variadic: false,
        }
    }

    #[test]
    fn a_function_defined_in_one_pkey_and_used_in_another_is_cross_compartment() {
        let mut analysis = CrossCompartmentAnalysis::new();
        analysis
            .record(
                1,
                &[FnProto {
                    name: "add".into(),
                    signature: Some(sig()),
                    is_definition: true,
                    is_static: false,
                    skip_wrap: false,
                }],
            )
            .unwrap();
        analysis
            .record(
                2,
                &[FnProto {
                    name: "add".into(),
                    signature: Some(sig()),
                    is_definition: false,
                    is_static: false,
                    skip_wrap: false,
                }],
            )
            .unwrap();

        let calls = analysis.cross_compartment_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (2, "add".to_string(), 1, sig()));
    }

    #[test]
    fn same_pkey_declare_and_define_is_not_cross_compartment() {
        let mut analysis = CrossCompartmentAnalysis::new();
        analysis
            .record(
                1,
                &[
                    FnProto {
                        name: "helper".into(),
                        signature: Some(sig()),
                        is_definition: false,
                        is_static: false,
                        skip_wrap: false,
                    },
                    FnProto {
                        name: "helper".into(),
                        signature: Some(sig()),
                        is_definition: true,
                        is_static: false,
                        skip_wrap: false,
                    },
                ],
            )
            .unwrap();
        assert!(analysis.cross_compartment_calls().is_empty());
    }

    #[test]
    fn conflicting_definitions_are_rejected() {
        let mut analysis = CrossCompartmentAnalysis::new();
        analysis
            .record(
                1,
                &[FnProto {
                    name: "dup".into(),
                    signature: Some(sig()),
                    is_definition: true,
                    is_static: false,
                    skip_wrap: false,
                }],
            )
            .unwrap();
        let err = analysis.record(
            2,
            &[FnProto {
                name: "dup".into(),
                signature: Some(sig()),
                is_definition: true,
                is_static: false,
                skip_wrap: false,
            }],
        );
        assert!(matches!(err, Err(RewriterError::MultipleDefinitions { .. })));
    }
}
