use anyhow::Context;
use clap::Parser;
use pgworkload::cli::{Cli, Commands};
use pgworkload::config::RunConfig;
use pgworkload::run::{run_workload, serve_worker};
use tracing_subscriber::EnvFilter;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let fallback = match &cli.command {
        Commands::Run(args) => args.log_level.as_str(),
        Commands::Worker(_) => "info",
    };
    // stdout carries reports, and in worker processes the control protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => {
            let config = RunConfig::from_args(&args)?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start the runtime")?;
            let outcome = runtime.block_on(run_workload(config))?;
            // Workers abandoned after the shutdown timeout must not hold up the exit.
            runtime.shutdown_background();
            Ok(outcome.exit_code())
        }
        Commands::Worker(args) => {
            serve_worker(args.threads)?;
            Ok(0)
        }
    }
}
