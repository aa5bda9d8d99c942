//! slsa-check CLI - verify SLSA provenance and VSA attestations.
//!
//! This is the CLI binary over the `slsa-check` verification engine.
//! Success prints `PASSED: Verified SLSA provenance` to stderr and exits
//! 0; any failure prints `FAILED: SLSA verification failed: <error>` and
//! exits 1.

mod cli;
mod commands;

use clap::Parser;
use cli::{ArtifactCommands, Cli, Commands, ImageCommands, NpmCommands};
use tracing_subscriber::EnvFilter;

const SUCCESS: &str = "PASSED: Verified SLSA provenance";
const FAILURE: &str = "FAILED: SLSA verification failed";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{FAILURE}: {e}");
        std::process::exit(1);
    }
    eprintln!("{SUCCESS}");
}

fn run() -> slsa_check::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::VerifyArtifact { command } => match command {
            ArtifactCommands::Provenance(args) => commands::run_artifact_provenance(&args),
            ArtifactCommands::Vsa(args) => commands::run_artifact_vsa(&args),
        },
        Commands::VerifyImage { command } => match command {
            ImageCommands::Provenance(args) => commands::run_image_provenance(&args),
        },
        Commands::VerifyNpmPackage { command } => match command {
            NpmCommands::Attestations(args) => commands::run_npm_attestations(&args),
        },
    }
}
