//! Assembles the rewriter's three generated build artifacts from the
//! frozen opaque-type registry, call-site registry, and cross-compartment
//! call list:
//!
//! - `<prefix>.h` — opaque struct declarations, `IA2_TYPE_<mangled>`
//!   aliases, `extern` wrapper symbols, and the `__libia2_abort` landing pad.
//! - `<prefix>.c` — the concatenation of every generated wrapper plus the
//!   global `ia2_fn_ptr` scratch slot definition.
//! - `<prefix>_<pkey>.ld` — one `--wrap=<sym>` linker argument file per
//!   caller pkey.

use std::collections::BTreeMap;

use ia2_abi::{AbiSignature, Arch};
use ia2_wrapgen::{emit_wrapper, WrapperKind, WrapperRequest};

use crate::error::Result;
use crate::opaque::OpaqueRegistry;

/// One cross-compartment call gate the emitter must generate a wrapper
/// for, already resolved to a concrete `(caller, target)` pkey pair.
#[derive(Debug, Clone)]
pub struct DirectGate {
    pub caller_pkey: u8,
    pub target_pkey: u8,
    pub symbol: String,
    pub signature: AbiSignature,
}

/// One shared indirect call gate, keyed by the mangled function-pointer
/// signature every `IA2_CALL` expansion with that signature targets.
#[derive(Debug, Clone)]
pub struct IndirectGate {
    pub caller_pkey: u8,
    pub mangled: String,
    pub signature: AbiSignature,
}

pub struct GeneratedArtifacts {
    pub header: String,
    pub source: String,
    /// `(caller_pkey, contents)` for each `<prefix>_<pkey>.ld` file.
    pub linker_args: Vec<(u8, String)>,
}

pub fn emit_artifacts(
    opaque: &OpaqueRegistry,
    direct: &[DirectGate],
    indirect: &[IndirectGate],
    arch: Arch,
    debug_assertions: bool,
) -> Result<GeneratedArtifacts> {
    let mut source = String::new();
    source.push_str("/* Generated by ia2-rewrite. Do not edit. */\n");
    source.push_str("void *ia2_fn_ptr;\n\n");

    let mut wrap_lines: BTreeMap<u8, Vec<String>> = BTreeMap::new();

    for gate in direct {
        let wrapper_name = format!("__wrap_{}", gate.symbol);
        let req = WrapperRequest {
            wrapper_name: wrapper_name.clone(),
            target_symbol: Some(gate.symbol.clone()),
            kind: WrapperKind::Direct,
            caller_pkey: gate.caller_pkey,
            target_pkey: gate.target_pkey,
            signature: gate.signature.clone(),
            arch,
            debug_assertions,
        };
        source.push_str(&emit_wrapper(&req)?);
        source.push('\n');
        wrap_lines
            .entry(gate.caller_pkey)
            .or_default()
            .push(format!("--wrap={}", gate.symbol));
    }

    for gate in indirect {
        let wrapper_name = format!("__ia2_indirect_{}", gate.mangled);
        let req = WrapperRequest {
            wrapper_name,
            target_symbol: None,
            kind: WrapperKind::IndirectCallsite,
            caller_pkey: gate.caller_pkey,
            target_pkey: ia2_memmap::UNTRUSTED_PKEY,
            signature: gate.signature.clone(),
            arch,
            debug_assertions,
        };
        source.push_str(&emit_wrapper(&req)?);
        source.push('\n');
    }

    let mut header = String::new();
    header.push_str("/* Generated by ia2-rewrite. Do not edit. */\n#pragma once\n\n");
    for ty in opaque.iter_in_order() {
        header.push_str(&format!(
            "struct {} {{ void *ptr; }};\n",
            ty.struct_name()
        ));
        header.push_str(&format!(
            "typedef {} IA2_TYPE_{};\n",
            ty.original_spelling, ty.mangled
        ));
    }
    header.push('\n');
    for gate in direct {
        header.push_str(&format!("extern void __wrap_{}(void);\n", gate.symbol));
    }
    header.push_str("\nasm(\"__libia2_abort:\\n ud2\");\n");

    let linker_args = wrap_lines
        .into_iter()
        .map(|(pkey, lines)| (pkey, lines.join("\n") + "\n"))
        .collect();

    Ok(GeneratedArtifacts {
        header,
        source,
        linker_args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ia2_abi::SlotKind;

    /// Scenario 1: generated `*_2.ld` contains `--wrap=add`.
    #[test]
    fn scenario_1_emits_wrap_line_for_caller_pkey() {
        let opaque = OpaqueRegistry::new();
        let direct = vec![DirectGate {
            caller_pkey: 2,
            target_pkey: 1,
            symbol: "add".into(),
            signature: AbiSignature {
                args: vec![SlotKind::Integer, SlotKind::Integer],
                ret: vec![SlotKind::Integer],
                variadic: false,
            },
        }];
        let artifacts = emit_artifacts(&opaque, &direct, &[], Arch::X86_64, false).unwrap();
        let (pkey, ld) = &artifacts.linker_args[0];
        assert_eq!(*pkey, 2);
        assert!(ld.contains("--wrap=add"));
        assert!(artifacts.source.contains("call add"));
    }
}
