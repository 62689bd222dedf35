//! Property, correctness, and policy test tooling for the IA2
//! compartmentalization toolkit: `property_based` (memory-map and ABI
//! invariants), `correctness` (rewriter round-trip and idempotence), and
//! `security` (tracer policy scenarios). ABI/wrapper register-count
//! preservation is covered by `ia2-abi`/`ia2-wrapgen`'s own unit tests.
//!
//! This crate is a harness, not a product library: every module below is
//! `#[cfg(test)]`-only content plus the small fixture helpers the tests
//! share.

pub mod correctness;
pub mod property_based;
pub mod security;

/// Shared fixture helpers: writes a tiny `compile_commands.json` plus its
/// listed C sources into a scratch directory.
pub mod fixture {
    use std::path::{Path, PathBuf};

    /// One source file to materialize under a fixture's root directory,
    /// with the pkey its compile command should carry.
    pub struct FixtureFile {
        pub relative_path: &'static str,
        pub pkey: u8,
        pub contents: &'static str,
    }

    /// Writes every file in `files` under `root`, plus a
    /// `compile_commands.json` carrying a `-DPKEY=<N>` define for each,
    /// and returns the path to that compile database.
    pub fn write_compile_commands(root: &Path, files: &[FixtureFile]) -> PathBuf {
        let mut entries = Vec::new();
        for f in files {
            let path = root.join(f.relative_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("create fixture parent dir");
            }
            std::fs::write(&path, f.contents).expect("write fixture source");
            entries.push(serde_json::json!({
                "directory": root.display().to_string(),
                "command": format!("clang -DPKEY={} -c {}", f.pkey, f.relative_path),
                "file": f.relative_path,
            }));
        }
        let db_path = root.join("compile_commands.json");
        std::fs::write(
            &db_path,
            serde_json::to_string_pretty(&entries).expect("serialize compile_commands.json"),
        )
        .expect("write compile_commands.json");
        db_path
    }
}
