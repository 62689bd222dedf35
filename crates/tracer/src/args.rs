use clap::Parser;
use std::path::PathBuf;

/// `ia2-tracer`: run `command` under syscall supervision, enforcing the
/// compartment memory map.
#[derive(Debug, Parser)]
#[command(name = "ia2-tracer", version, about)]
pub struct TracerArgs {
    /// Path to the guarded executable.
    pub command: PathBuf,

    /// Arguments passed through to `command`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command_args: Vec<String>,

    /// `error`, `warn`, `info`, `debug`, or `trace`; overridable with
    /// `RUST_LOG`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(short, long)]
    pub verbose: bool,

    /// Block `/proc/self/mem` in the guarded process via Landlock before
    /// it runs any application code.
    #[arg(long, default_value_t = true)]
    pub landlock: bool,

    /// Print every permit/deny decision and the map it produced, for
    /// debugging policy violations.
    #[arg(long)]
    pub trace_decisions: bool,
}

impl TracerArgs {
    pub fn effective_log_level(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}
