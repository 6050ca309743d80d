//! Command-line entry point for ThreadTune.

use anyhow::Result;
use clap::Parser;
use threadtune_autotune::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
