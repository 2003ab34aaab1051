use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    fitness_sync_cli::init_tracing();
    let cli = fitness_sync_cli::Cli::parse();
    fitness_sync_cli::run_cli(cli)
}
