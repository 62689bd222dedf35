//! Emits the assembly text for a cross-compartment call gate ("wrapper" /
//! "trampoline"), given an ABI signature, the caller/target pkeys, and the
//! wrapper's role at the call site.

mod emit_aarch64;
mod emit_x86_64;
mod error;
mod kind;
mod request;

pub use error::WrapgenError;
pub use kind::WrapperKind;
pub use request::WrapperRequest;

use ia2_abi::Arch;

/// Emit the assembly text defining `req.wrapper_name` as a call gate.
///
/// Returns a `.global`/`.local`-qualified symbol definition; the rewriter
/// concatenates the output of many calls into one generated translation
/// unit.
pub fn emit_wrapper(req: &WrapperRequest) -> Result<String, WrapgenError> {
    if req.caller_pkey == 0 {
        // "Caller-is-0 shortcut": IA2_CALL from the untrusted compartment is
        // a plain cast-and-call; no wrapper gate exists for it.
        return Err(WrapgenError::CallerIsUntrusted);
    }
    if req.caller_pkey == req.target_pkey {
        return Err(WrapgenError::SameCompartment {
            pkey: req.caller_pkey,
        });
    }

    match req.arch {
        Arch::X86_64 => emit_x86_64::emit(req),
        Arch::Aarch64 => emit_aarch64::emit(req),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ia2_abi::{AbiSignature, SlotKind};

    fn add_signature() -> AbiSignature {
        AbiSignature {
            args: vec![SlotKind::Integer, SlotKind::Integer],
            ret: vec![SlotKind::Integer],
            variadic: false,
        }
    }

    /// Scenario 1: compartment 2 calls `add` defined in compartment 1.
    #[test]
    fn scenario_1_direct_wrap_add() {
        let req = WrapperRequest {
            wrapper_name: "__wrap_add".into(),
            target_symbol: Some("add".into()),
            kind: WrapperKind::Direct,
            caller_pkey: 2,
            target_pkey: 1,
            signature: add_signature(),
            arch: Arch::X86_64,
            debug_assertions: false,
        };
        let asm = emit_wrapper(&req).unwrap();
        assert!(asm.contains(".global __wrap_add"));
        assert!(asm.contains("call add"));
        assert!(asm.contains("ia2_stackptr_2"));
        assert!(asm.contains("ia2_stackptr_1"));
    }

    #[test]
    fn caller_zero_has_no_wrapper() {
        let req = WrapperRequest {
            wrapper_name: "__wrap_add".into(),
            target_symbol: Some("add".into()),
            kind: WrapperKind::Direct,
            caller_pkey: 0,
            target_pkey: 1,
            signature: add_signature(),
            arch: Arch::X86_64,
            debug_assertions: false,
        };
        assert_eq!(emit_wrapper(&req), Err(WrapgenError::CallerIsUntrusted));
    }

    #[test]
    fn indirect_callsite_loads_from_global_slot_on_both_arches() {
        for arch in [Arch::X86_64, Arch::Aarch64] {
            let req = WrapperRequest {
                wrapper_name: "__ia2_indirect_Pvi".into(),
                target_symbol: None,
                kind: WrapperKind::IndirectCallsite,
                caller_pkey: 2,
                target_pkey: 0,
                signature: AbiSignature {
                    args: vec![SlotKind::Integer],
                    ret: vec![],
                    variadic: false,
                },
                arch,
                debug_assertions: false,
            };
            let asm = emit_wrapper(&req).unwrap();
            assert!(asm.contains("ia2_fn_ptr"));
        }
    }

    #[test]
    fn pointer_to_static_emits_as_macro() {
        let req = WrapperRequest {
            wrapper_name: "__wrap_helper".into(),
            target_symbol: Some("helper".into()),
            kind: WrapperKind::PointerToStatic,
            caller_pkey: 1,
            target_pkey: 2,
            signature: add_signature(),
            arch: Arch::X86_64,
            debug_assertions: false,
        };
        let asm = emit_wrapper(&req).unwrap();
        assert!(asm.starts_with("#define IA2_DEFINE_WRAPPER___wrap_helper"));
        assert!(asm.contains(" \\\n"));
    }

    /// Scenario 6: `struct {double a; double b;} f(int x)` returns two Float
    /// slots in xmm0/xmm1. `__libia2_scrub_registers` zeroes all SSE/AVX
    /// registers unconditionally, so the wrapper must spill xmm0/xmm1 around
    /// the scrub call rather than dropping them on the floor.
    #[test]
    fn float_return_slots_survive_register_scrub_on_both_arches() {
        for arch in [Arch::X86_64, Arch::Aarch64] {
            let req = WrapperRequest {
                wrapper_name: "__wrap_f".into(),
                target_symbol: Some("f".into()),
                kind: WrapperKind::Direct,
                caller_pkey: 2,
                target_pkey: 1,
                signature: AbiSignature {
                    args: vec![SlotKind::Integer],
                    ret: vec![SlotKind::Float, SlotKind::Float],
                    variadic: false,
                },
                arch,
                debug_assertions: false,
            };
            let asm = emit_wrapper(&req).unwrap();
            let (reg0, reg1) = match arch {
                Arch::X86_64 => ("xmm0", "xmm1"),
                Arch::Aarch64 => ("d0", "d1"),
            };
            assert!(
                asm.matches(reg0).count() >= 2,
                "{reg0} must be spilled and restored around the scrub call:\n{asm}"
            );
            assert!(
                asm.matches(reg1).count() >= 2,
                "{reg1} must be spilled and restored around the scrub call:\n{asm}"
            );
        }
    }
}
