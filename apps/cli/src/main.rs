//! phishlens CLI: triage the URLs found in a batch of suspicious emails.
//!
//! Extracts and normalizes links, checks them against a URL-reputation
//! scanner and a sandbox, and writes a prioritized findings report.

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
