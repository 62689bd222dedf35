//! Top-level orchestration: walks every translation unit named in the
//! compile database, runs the `FnDecl` pass over all of them first (so
//! cross-compartment calls are known before any rewriting happens), then
//! runs the combined `FnPtrTypes`/`FnPtrExpr`/`FnPtrCall`/`FnPtrNull`/
//! `FnPtrEq` pass per file, and finally emits the generated header,
//! assembly source, and per-pkey linker-argument files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use ia2_abi::Arch;
use lang_c::driver::{parse_preprocessed, Config};

use crate::addr_taken::AddrTakenSets;
use crate::callsite::CallSiteRegistry;
use crate::compile_db::CompileDatabase;
use crate::edit::EditBuffer;
use crate::emit::{self, DirectGate, GeneratedArtifacts, IndirectGate};
use crate::error::{Result, RewriterError};
use crate::fndecl::{self, CrossCompartmentAnalysis};
use crate::opaque::OpaqueRegistry;
use crate::rewrite_pass::{KnownFunctions, RewritePass};
use crate::types::TypedefTable;

/// Prepended to a rewritten file's output, so that running the rewriter
/// twice over the output of a first run is a no-op: a file that already
/// carries this marker is copied through unchanged rather than
/// re-matched, since the `FnPtrExpr`/`FnPtrCall` passes would otherwise
/// double-wrap an already-generated `IA2_FN(...)` / `IA2_CALL(...)`
/// expression.
pub const IA2_REWRITTEN_MARKER: &str = "/* __ia2_rewritten */\n";

pub struct RewriteRequest {
    pub root_directory: PathBuf,
    pub output_directory: PathBuf,
    pub output_prefix: String,
    pub arch: Arch,
    pub debug_assertions: bool,
}

pub struct RewriteReport {
    pub files_rewritten: Vec<PathBuf>,
    pub files_copied_unchanged: Vec<PathBuf>,
    pub warnings: Vec<String>,
    /// Mangled signatures of every opaque function-pointer type interned
    /// during this run, in first-seen order; surfaced by `--dump-abi`.
    pub opaque_types: Vec<String>,
    pub direct_gate_count: usize,
    pub indirect_gate_count: usize,
}

pub fn run(req: &RewriteRequest, db: &CompileDatabase) -> Result<RewriteReport> {
    fs::create_dir_all(&req.output_directory)?;

    let units: Vec<_> = db.units().collect();

    // Pass 1 (FnDecl): scan every unit first so cross-compartment calls are
    // known before any file is rewritten.
    let mut analysis = CrossCompartmentAnalysis::new();
    let mut all_names = BTreeSet::new();
    let mut static_names = BTreeSet::new();
    let mut parsed = Vec::new();
    for unit in &units {
        if unit.pkey == 0 {
            continue;
        }
        ia2_memmap::validate_pkey(unit.pkey).map_err(|_| RewriterError::PkeyOutOfRange(unit.pkey))?;
        let source = fs::read_to_string(&unit.path)?;
        let parse = parse_preprocessed(&Config::default(), source.clone()).map_err(|e| {
            RewriterError::Parse {
                path: unit.path.display().to_string(),
                source: e,
            }
        })?;
        let protos = fndecl::scan_translation_unit(&parse, req.arch)?;
        for p in &protos {
            all_names.insert(p.name.clone());
            if p.is_static {
                static_names.insert(p.name.clone());
            }
        }
        analysis.record(unit.pkey, &protos)?;
        parsed.push((unit.clone(), source, parse));
    }

    let known = KnownFunctions {
        names: &all_names,
        static_names: &static_names,
    };

    // Pass 2-6: rewrite each non-untrusted file in place.
    let mut opaque = OpaqueRegistry::new();
    let mut addr_taken = AddrTakenSets::new();
    let mut indirect_by_caller: Vec<(u8, CallSiteRegistry)> = Vec::new();
    let mut report = RewriteReport {
        files_rewritten: Vec::new(),
        files_copied_unchanged: Vec::new(),
        warnings: Vec::new(),
        opaque_types: Vec::new(),
        direct_gate_count: 0,
        indirect_gate_count: 0,
    };

    for (unit, source, parse) in &parsed {
        let rel = relative_to(&req.root_directory, &unit.path);
        let out_path = req.output_directory.join(&rel);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let already_rewritten = source.starts_with(IA2_REWRITTEN_MARKER);
        let mut callsites = CallSiteRegistry::new();
        let rewritten = if already_rewritten {
            source.clone()
        } else {
            let mut edits = EditBuffer::new();
            {
                let mut pass = RewritePass {
                    file: &rel.display().to_string(),
                    arch: req.arch,
                    typedefs: TypedefTable::new(),
                    known: &known,
                    opaque: &mut opaque,
                    addr_taken: &mut addr_taken,
                    callsites: &mut callsites,
                    edits: &mut edits,
                };
                pass.run(&parse.unit)?;
            }
            if edits.is_empty() {
                source.clone()
            } else {
                format!("{IA2_REWRITTEN_MARKER}{}", edits.apply(source))
            }
        };
        fs::write(&out_path, &rewritten)?;
        report.files_rewritten.push(out_path);
        indirect_by_caller.push((unit.pkey, callsites));
    }

    // Untrusted-compartment files are copied byte-identical: rewriting a
    // file whose pkey is 0 always yields a byte-identical file.
    for unit in &units {
        if unit.pkey != 0 {
            continue;
        }
        let rel = relative_to(&req.root_directory, &unit.path);
        let out_path = req.output_directory.join(&rel);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&unit.path, &out_path)?;
        report.files_copied_unchanged.push(out_path);
    }

    // Assemble generated artifacts.
    let direct: Vec<DirectGate> = analysis
        .cross_compartment_calls()
        .into_iter()
        .map(|(caller, name, target, sig)| DirectGate {
            caller_pkey: caller,
            target_pkey: target,
            symbol: name,
            signature: sig,
        })
        .collect();

    let mut indirect = Vec::new();
    for (caller_pkey, registry) in &indirect_by_caller {
        for (mangled, sig) in registry.iter() {
            indirect.push(IndirectGate {
                caller_pkey: *caller_pkey,
                mangled: mangled.to_string(),
                signature: sig.clone(),
            });
        }
    }

    let artifacts: GeneratedArtifacts =
        emit::emit_artifacts(&opaque, &direct, &indirect, req.arch, req.debug_assertions)?;

    fs::write(
        req.output_directory.join(format!("{}.h", req.output_prefix)),
        artifacts.header,
    )?;
    fs::write(
        req.output_directory.join(format!("{}.c", req.output_prefix)),
        artifacts.source,
    )?;
    for (pkey, contents) in artifacts.linker_args {
        fs::write(
            req.output_directory
                .join(format!("{}_{pkey}.ld", req.output_prefix)),
            contents,
        )?;
    }

    report.opaque_types = opaque.iter_in_order().map(|t| t.mangled.clone()).collect();
    report.direct_gate_count = direct.len();
    report.indirect_gate_count = indirect.len();

    Ok(report)
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
