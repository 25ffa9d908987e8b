//! Command line interface for the FEA-Bench harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

/// Validate FEA-Bench tasks and generate candidate patches.
#[derive(Parser)]
#[command(name = "feabench", author, version, about)]
struct Cli {
    /// Configuration file; defaults to `./feabench.toml`, then the user config directory.
    #[arg(long, global = true, env = feabench::config::CONFIG_ENV)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every task through the baseline, test patch and fix patch stages.
    Validate(cmd::validate::Config),

    /// Ask a model for implementation plans or patches.
    Generate(cmd::generate::Config),

    /// Summarize a validation ledger.
    Report(cmd::report::Config),

    /// List the tasks in the dataset.
    List(cmd::list::Config),
}

fn main() -> Result<()> {
    color_eyre::install()?;

    // Logs go to stderr so that report output on stdout stays machine readable.
    //
    // Examples:
    // - `FEABENCH_LOG=debug` to include the output of every external command
    // - `FEABENCH_LOG=feabench::repo=trace` to trace git operations only
    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .pretty()
                .with_writer(std::io::stderr)
                .with_filter(
                    EnvFilter::builder()
                        .with_env_var("FEABENCH_LOG")
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    let cli = Cli::parse();
    let settings = feabench::config::Config::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Validate(config) => cmd::validate::main(config, settings),
        Commands::Generate(config) => cmd::generate::main(config, settings),
        Commands::Report(config) => cmd::report::main(config, settings),
        Commands::List(config) => cmd::list::main(config, settings),
    }
}
