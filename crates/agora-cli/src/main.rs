//! Agora CLI — run nodes and relays, and talk to a running gateway.

mod cli;
mod cmd;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cmd::run::run_node(args).await,
        Commands::Relay(args) => cmd::run::run_relay(args).await,
        Commands::Status(args) => cmd::remote::status(&args.gateway).await,
        Commands::Agents(args) => cmd::remote::agents(&args.gateway).await,
        Commands::Send(args) => cmd::remote::send(args).await,
    }
}
