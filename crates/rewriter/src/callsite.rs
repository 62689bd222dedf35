//! Call-site type registry: `{opaque_type -> ABI signature}` for every
//! indirect call site the `FnPtrCall` pass observed,
//! frozen once rewriting finishes and consumed by the wrapper emitter to
//! generate one shared `IndirectCallsite` gate per distinct signature.

use std::collections::BTreeMap;

use ia2_abi::AbiSignature;

#[derive(Debug, Default)]
pub struct CallSiteRegistry {
    signatures: BTreeMap<String, AbiSignature>,
}

impl CallSiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, opaque_mangled: &str, signature: AbiSignature) {
        self.signatures.entry(opaque_mangled.to_string()).or_insert(signature);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AbiSignature)> {
        self.signatures.iter().map(|(k, v)| (k.as_str(), v))
    }
}
