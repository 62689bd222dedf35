//! Memory-map disjointness/ownership and ABI register-count-preservation
//! invariants as `proptest` properties over `ia2-abi` and `ia2-wrapgen`,
//! generalizing those crates' own scalar-signature unit tests to arbitrary
//! argument lists instead of a handful of hand-picked signatures.

#[cfg(test)]
mod tests {
    use ia2_abi::{classify_function, Arch, CType, SlotKind};
    use ia2_wrapgen::{emit_wrapper, WrapperKind, WrapperRequest};
    use proptest::prelude::*;

    /// A scalar-only argument: `classify_function` never merges these with
    /// a neighbor (only aggregate flattening does that), so each produces
    /// exactly one slot.
    fn scalar_ctype() -> impl Strategy<Value = CType> {
        prop_oneof![
            Just(CType::Integer { size: 4 }),
            Just(CType::Integer { size: 8 }),
            Just(CType::Float { size: 4 }),
            Just(CType::Float { size: 8 }),
        ]
    }

    /// Invariant 3 ("no slot leakage"): classifying a signature built only
    /// from scalar arguments produces exactly one slot per argument, of the
    /// matching kind, on both architectures. A struct/HFA argument can fold
    /// several fields into one eightbyte or spill into `Memory`; a scalar
    /// argument never does either, so a 1:1 mapping here is load-bearing.
    proptest! {
        #[test]
        fn scalar_args_classify_one_slot_each(
            args in prop::collection::vec(scalar_ctype(), 0..8),
            arch in prop_oneof![Just(Arch::X86_64), Just(Arch::Aarch64)],
        ) {
            let sig = classify_function(&args, &CType::Void, false, arch).unwrap();
            prop_assert_eq!(sig.args.len(), args.len());
            for (slot, arg) in sig.args.iter().zip(args.iter()) {
                let expected = match arg {
                    CType::Integer { .. } => SlotKind::Integer,
                    CType::Float { .. } => SlotKind::Float,
                    _ => unreachable!("scalar_ctype only produces Integer/Float"),
                };
                prop_assert_eq!(*slot, expected);
            }
        }

        /// Invariant 3, return side: a single scalar return never demotes
        /// to `Memory` (only an oversized/aggregate return does), so it is
        /// always exactly one slot of the matching kind.
        #[test]
        fn scalar_return_is_one_matching_slot(
            ret in scalar_ctype(),
            arch in prop_oneof![Just(Arch::X86_64), Just(Arch::Aarch64)],
        ) {
            let sig = classify_function(&[], &ret, false, arch).unwrap();
            let expected = match &ret {
                CType::Integer { .. } => SlotKind::Integer,
                CType::Float { .. } => SlotKind::Float,
                _ => unreachable!(),
            };
            prop_assert_eq!(sig.ret.as_slice(), &[expected]);
        }

        /// Invariant 3 as seen by the wrapper emitter: the number of stack
        /// arguments the x86-64 gate copies equals exactly the number of
        /// `Memory` slots in the signature — a scalar-only signature with 8
        /// or fewer integer args and 8 or fewer float args never spills to
        /// the stack, so `mem_args` stays 0 and the "copy N stack
        /// argument(s)" comment never appears.
        #[test]
        fn wrapper_copies_exactly_the_memory_slot_count(
            n_int in 0usize..6,
            n_float in 0usize..8,
        ) {
            let mut args = Vec::new();
            args.extend(std::iter::repeat(SlotKind::Integer).take(n_int));
            args.extend(std::iter::repeat(SlotKind::Float).take(n_float));
            let sig = ia2_abi::AbiSignature {
                args,
                ret: vec![SlotKind::Integer],
                variadic: false,
            };
            let expected_mem_args = sig.stack_arg_slots();
            prop_assert_eq!(expected_mem_args, 0);

            let req = WrapperRequest {
                wrapper_name: "__wrap_scalar_probe".into(),
                target_symbol: Some("scalar_probe".into()),
                kind: WrapperKind::Direct,
                caller_pkey: 1,
                target_pkey: 2,
                signature: sig,
                arch: Arch::X86_64,
                debug_assertions: false,
            };
            let asm = emit_wrapper(&req).unwrap();
            prop_assert!(!asm.contains("copy 0 stack argument"));
            prop_assert!(!asm.contains("stack argument(s) from caller"));
        }

        /// Once integer arguments exceed the 6-register SysV budget, the
        /// overflow becomes `Memory` slots and the gate must copy exactly
        /// that many stack arguments — no more, no fewer.
        #[test]
        fn wrapper_copies_overflow_integer_args_from_the_stack(
            n_int in 7usize..20,
        ) {
            let args: Vec<SlotKind> = std::iter::repeat(SlotKind::Integer).take(n_int).collect();
            let sig = ia2_abi::AbiSignature {
                args,
                ret: vec![SlotKind::Integer],
                variadic: false,
            };
            let expected_mem_args = n_int - 6;
            prop_assert_eq!(sig.stack_arg_slots(), expected_mem_args);

            let req = WrapperRequest {
                wrapper_name: "__wrap_overflow_probe".into(),
                target_symbol: Some("overflow_probe".into()),
                kind: WrapperKind::Direct,
                caller_pkey: 1,
                target_pkey: 2,
                signature: sig,
                arch: Arch::X86_64,
                debug_assertions: false,
            };
            let asm = emit_wrapper(&req).unwrap();
            prop_assert!(asm.contains(&format!(
                "copy {expected_mem_args} stack argument(s) from caller's stack"
            )));
        }
    }

    /// A variadic function with an aggregate argument is rejected outright
    /// rather than silently misclassified, regardless of where in the
    /// fixed parameter list it appears.
    proptest! {
        #[test]
        fn variadic_aggregate_argument_is_always_rejected(
            index in 0usize..4,
            arch in prop_oneof![Just(Arch::X86_64), Just(Arch::Aarch64)],
        ) {
            let agg = CType::Aggregate(ia2_abi::CAggregate {
                size: 8,
                align: 4,
                fields: vec![ia2_abi::CField { offset: 0, ty: CType::Integer { size: 4 } }],
                is_union: false,
            });
            let mut args = vec![CType::Integer { size: 4 }; index];
            args.push(agg);
            let result = classify_function(&args, &CType::Void, true, arch);
            prop_assert!(result.is_err());
        }
    }
}
