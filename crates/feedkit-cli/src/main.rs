use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod commands;

use args::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose raises the default level
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if present
    let _ = dotenvy::dotenv();

    let result = match &cli.command {
        Command::Analyze(args) => commands::analyze::run(args).await,
        Command::Dedup(args) => commands::dedup::run(args),
        Command::Report(args) => commands::report::run(args),
    };

    if let Err(err) = result {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
