//! # VCS Hooks Main Entry Point

use clap::{Parser, Subcommand};
use vcs_hooks::{
    config::ConfigLoader,
    server::{run_migrations, run_server},
    telemetry::init_tracing,
};

#[derive(Parser)]
#[command(name = "vcs-hooks", version, about = "Repository connections and webhook lifecycle")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Apply migrations and start the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Migrate => run_migrations(&config).await.map(|_| ()),
    }
}
