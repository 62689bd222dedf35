//! `ia2-rewriter`: the C-AST source rewriter and ABI-aware wrapper driver.
//! Parses every translation unit named in a
//! `compile_commands.json`, classifies each function's ABI signature via
//! `ia2-abi`, rewrites function-pointer declarations and call sites in
//! place, and emits a generated header, assembly source, and per-pkey
//! linker-argument files via `ia2-wrapgen`.

pub mod addr_taken;
pub mod callsite;
pub mod compile_db;
pub mod driver;
pub mod edit;
pub mod emit;
pub mod error;
pub mod fndecl;
pub mod opaque;
pub mod rewrite_pass;
pub mod types;

pub use compile_db::{CompileDatabase, CompileUnit};
pub use driver::{run, RewriteReport, RewriteRequest, IA2_REWRITTEN_MARKER};
pub use error::{Result, RewriterError};
