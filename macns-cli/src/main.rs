//! macns CLI
//!
//! Runs one command inside a freshly created network namespace that holds a
//! single macvlan cloned from a physical uplink, then removes the namespace.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod lifecycle;
mod run;

use cli::Cli;

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match run::execute(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {e:#}");
            1
        }
    };

    process::exit(code);
}
