//! Espectro CLI - Command-line interface for the espectro constant-Q
//! transform engine.

mod commands;
mod wav;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "espectro")]
#[command(author, version, about = "Constant-Q spectrum analysis and resynthesis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter an audio file through the analysis/synthesis chain with a
    /// per-band gain (spectral tilt)
    Filter(commands::filter::FilterArgs),

    /// Analyze an audio file and print per-band magnitudes
    Analyze(commands::analyze::AnalyzeArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Filter(args) => commands::filter::run(args),
        Commands::Analyze(args) => commands::analyze::run(args),
    }
}
