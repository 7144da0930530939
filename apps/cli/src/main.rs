//! OrgScope CLI — corporate leadership intelligence from the command line.
//!
//! Discovers a company's business units, collects leadership evidence from
//! the web, filings, and news, and renders change feeds and org charts.

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
