//! Sage evaluation runner entry point.

use anyhow::Result;
use clap::Parser;
use sagectl::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    sagectl::runner::run(cli).await
}
