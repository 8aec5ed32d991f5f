//! tracebench CLI: synthetic multi-stage pipeline for benchmarking tracing.

use std::process::ExitCode;

use clap::Parser;
use tracing::info;

use tracebench::{CliArgs, Config, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = CliArgs::parse();

    let paths = args.config_paths();
    if paths.is_empty() {
        eprintln!("Error: no config files or directories specified");
        return ExitCode::FAILURE;
    }

    info!("Loading config from {} source(s)", paths.len());

    let config = match Config::from_paths(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        topology = %config.pipeline.topology_type(),
        stages = config.pipeline.stage_count(),
        latency_ms = config.pipeline.latency_ms(),
        fail_rate = config.pipeline.fail_rate(),
        ingress = %config.ingress.address,
        "Starting tracebench"
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tracebench failed: {e}");
            ExitCode::FAILURE
        }
    }
}
