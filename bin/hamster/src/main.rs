//! hamster deploys the Hamster protocol contracts and wires them together.

mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Deploy(args) => commands::deploy(&config, args).await,
        Command::Plan(args) => commands::plan(&config, args),
        Command::Networks(args) => commands::networks(&config, args),
    }
}
