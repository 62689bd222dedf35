//! Address-taken function set: partitioned by linkage so
//! that a `static` function's generated wrapper only needs to be visible
//! within the translation unit that defines it.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddrTakenFn {
    pub name: String,
    pub opaque_mangled: String,
}

/// `external: {function_name -> opaque_type}` and
/// `internal: {source_file -> {(function_name, opaque_type)}}`.
#[derive(Debug, Default)]
pub struct AddrTakenSets {
    external: BTreeMap<String, String>,
    internal: BTreeMap<String, Vec<AddrTakenFn>>,
}

impl AddrTakenSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_external(&mut self, name: &str, opaque_mangled: &str) {
        self.external.insert(name.to_string(), opaque_mangled.to_string());
    }

    pub fn record_internal(&mut self, file: &str, name: &str, opaque_mangled: &str) {
        let entry = self.internal.entry(file.to_string()).or_default();
        let candidate = AddrTakenFn {
            name: name.to_string(),
            opaque_mangled: opaque_mangled.to_string(),
        };
        if !entry.contains(&candidate) {
            entry.push(candidate);
        }
    }

    pub fn external(&self) -> impl Iterator<Item = (&str, &str)> {
        self.external.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn internal_for(&self, file: &str) -> &[AddrTakenFn] {
        self.internal.get(file).map(Vec::as_slice).unwrap_or(&[])
    }
}
