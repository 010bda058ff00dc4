//! `keel`: command-line client for the keel container engine daemon.
//!
//! Parses arguments into [`cli::Cli`] and dispatches to the matching
//! subcommand, each of which talks to `keeld` over the same HTTP/JSON API
//! a remote client would use.

mod cli;
mod client;
mod commands;
mod wire;

use clap::Parser;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    if let Err(e) = cli::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
