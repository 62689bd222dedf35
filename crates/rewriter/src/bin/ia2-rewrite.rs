//! Build-tool CLI for the source rewriter.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ia2_abi::Arch;
use ia2_rewriter::compile_db::CompileDatabase;
use ia2_rewriter::driver::{self, RewriteRequest};

#[derive(Parser, Debug)]
#[command(name = "ia2-rewrite", about = "Cross-compartment C source rewriter")]
struct Args {
    /// Input C source paths.
    inputs: Vec<PathBuf>,

    /// Prefix of input paths; every input must live under this directory.
    #[arg(long = "root-directory")]
    root_directory: PathBuf,

    /// Prefix of output paths; sources are copied here, then rewritten.
    #[arg(long = "output-directory")]
    output_directory: PathBuf,

    /// Stem for `<stem>.c`, `<stem>.h`, `<stem>_<pkey>.ld`.
    #[arg(long = "output-prefix")]
    output_prefix: String,

    /// Target architecture.
    #[arg(long, value_enum, default_value = "x86")]
    arch: CliArch,

    /// Path to `compile_commands.json`.
    #[arg(long = "compile-commands", default_value = "compile_commands.json")]
    compile_commands: PathBuf,

    /// Write the frozen call-site/address-taken registries as JSON for
    /// debugging (`original_source` `--dump-abi`-equivalent).
    #[arg(long = "dump-abi")]
    dump_abi: Option<PathBuf>,

    /// Emit the debug-only PKRU/tag assertion at the top of each wrapper.
    #[arg(long)]
    debug_assertions: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliArch {
    X86,
    Aarch64,
}

impl From<CliArch> for Arch {
    fn from(value: CliArch) -> Self {
        match value {
            CliArch::X86 => Arch::X86_64,
            CliArch::Aarch64 => Arch::Aarch64,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("ia2-rewrite failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let db = CompileDatabase::load(&args.compile_commands)
        .with_context(|| format!("loading {}", args.compile_commands.display()))?;
    let db = db.restrict_to(&args.inputs);

    let req = RewriteRequest {
        root_directory: args.root_directory.clone(),
        output_directory: args.output_directory.clone(),
        output_prefix: args.output_prefix.clone(),
        arch: args.arch.into(),
        debug_assertions: args.debug_assertions,
    };

    let report = driver::run(&req, &db).context("rewriting sources")?;

    if let Some(dump_path) = &args.dump_abi {
        let dump = serde_json::json!({
            "opaque_types": report.opaque_types,
            "direct_gates": report.direct_gate_count,
            "indirect_gates": report.indirect_gate_count,
        });
        std::fs::write(dump_path, serde_json::to_string_pretty(&dump)?)
            .with_context(|| format!("writing {}", dump_path.display()))?;
    }

    tracing::info!(
        rewritten = report.files_rewritten.len(),
        copied_unchanged = report.files_copied_unchanged.len(),
        "rewrite complete"
    );
    for warning in &report.warnings {
        tracing::warn!("{warning}");
    }

    Ok(())
}
