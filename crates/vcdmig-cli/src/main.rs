mod cli;
mod commands;
mod output;
mod prompt;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use commands::Globals;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logging at `info` unless `RUST_LOG` says otherwise, plus an
/// optional plain-text copy appended to `log_file`.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let file = match log_file {
        Some(path) => {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(handle)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let globals = Globals::load(&cli.config, cli.insecure, cli.output)?;
    match cli.command {
        Command::Export(args) => commands::export(args, globals).await,
        Command::Migrate(args) => commands::migrate(args, globals).await,
    }
}
