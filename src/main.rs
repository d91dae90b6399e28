use anyhow::Result;
use clap::Parser;
use dungeon_blocks_core::cli::Args;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    dungeon_blocks_core::run_cli(&args)
}
