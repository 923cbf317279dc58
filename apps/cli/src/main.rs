//! bundlewright CLI: assembles deployable bundles from a TOML bundle plan.
//!
//! Reads the plan, runs every script, style and markup fragment through the
//! configured transforms, and writes the bundle directory with its manifest.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
