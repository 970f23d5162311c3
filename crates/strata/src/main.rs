mod cli;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse_from(cli::normalize_args(std::env::args_os()));
    cli.execute().await
}
