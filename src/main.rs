#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod access;
mod auth;
mod cli;
mod config;
mod db;
mod media;
mod utils;
mod web;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(Config::load(cli.config.as_deref())?);
    utils::logging::init_tracing(&config.logging);

    info!("school-cms {} starting up", env!("CARGO_PKG_VERSION"));
    cli.run(config).await?;
    info!("school-cms shutting down");
    Ok(())
}
