mod cli;
mod config;
mod controller;
mod error;
mod jobs;
mod output;
mod pipeline;
mod repo;
mod store;
#[cfg(test)]
mod testing;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use env_logger::Env;
use log::info;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting cid - CI/CD control plane");
    cli.execute()?;

    Ok(())
}
