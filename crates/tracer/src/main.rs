use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ia2_tracer::TracerArgs;

fn main() -> ExitCode {
    let args = TracerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.effective_log_level())),
        )
        .init();

    match ia2_tracer::run(&args) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!("ia2-tracer failed: {e}");
            ExitCode::FAILURE
        }
    }
}
