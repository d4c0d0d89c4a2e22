//! Binary crate for the `weather` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments (flags, environment, `.env`)
//! - Interactive prompts for credentials and locations
//! - Printing one line or JSON record per location

use clap::Parser;
use std::io;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let cmd = cli::Cli::parse();
    init_tracing(cmd.verbose);

    cmd.run().await
}

fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => eprintln!("warning: unable to load .env file: {err}"),
        }
    }
}

/// Diagnostics go to stderr; stdout carries results only.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
