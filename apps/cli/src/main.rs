//! auditdoc CLI: assemble compliance review reports from upstream data.
//!
//! Fetches and caches canonical project data, validates it, and renders
//! Word report templates. JSON results go to stdout, logs to stderr.

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
