//! plglmm: pseudo-likelihood GLMM for count data with a kinship covariance.
//!
//! CLI entry point using clap for argument parsing.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "plglmm",
    version,
    about = "Pseudo-likelihood GLMM for counts with a known kinship covariance",
    long_about = "Fits a log-link generalized linear mixed model to count data.\n\
                  Random effects are i.i.d. per categorical grouping plus one\n\
                  effect per sample with covariance proportional to a kinship matrix."
)]
struct Cli {
    /// Number of threads to use
    #[arg(long, default_value = "1", global = true)]
    threads: usize,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the GLMM to a count table and save the model
    Fit(commands::fit::FitArgs),

    /// Print the summary of a saved model
    Summary(commands::summary::SummaryArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    tracing::info!("plglmm v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Using {} threads", cli.threads);

    match cli.command {
        Commands::Fit(args) => commands::fit::run(args),
        Commands::Summary(args) => commands::summary::run(args),
    }
}
