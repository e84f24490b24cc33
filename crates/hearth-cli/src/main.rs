mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, OverrideCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => commands::serve(config).await,
        Command::Status => commands::status(cli.remote).await,
        Command::Twin { device } => commands::twin(cli.remote, device).await,
        Command::Intent { device, value } => commands::intent(cli.remote, device, value).await,
        Command::Override { command } => match command {
            OverrideCommand::Set { device, category, value, reason, ttl_seconds } => {
                commands::override_set(cli.remote, device, category, value, reason, ttl_seconds)
                    .await
            }
            OverrideCommand::Clear { device, category } => {
                commands::override_clear(cli.remote, device, category).await
            }
        },
    }
}
