//! Corral CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use corral::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize error handling
    color_eyre::install()?;

    // Initialize tracing; stdout is left to command output
    let filter = if cli.debug {
        EnvFilter::new("corral=debug,corral_common=debug")
    } else {
        EnvFilter::from_default_env().add_directive("corral=info".parse()?)
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Execute command
    cli.execute().await
}
