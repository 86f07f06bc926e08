use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = chain_log_cli::Cli::parse();
    chain_log_cli::init_tracing(&cli.log_level);
    chain_log_cli::run_cli(cli)
}
