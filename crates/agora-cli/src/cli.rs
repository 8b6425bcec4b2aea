//! Command-line argument definitions.

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "agora", version, about = "Agora agent framework")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a node with the built-in agents (and gateway, if enabled).
    Run(RunArgs),
    /// Run a standalone relay for multi-process nodes.
    Relay(RelayArgs),
    /// Show health of a running gateway.
    Status(RemoteArgs),
    /// List agents registered on a running gateway.
    Agents(RemoteArgs),
    /// Submit a task through a running gateway and await the result.
    Send(SendArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RelayArgs {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:7430")]
    pub listen: SocketAddr,
    /// Pre-shared secret clients must authenticate with.
    #[arg(long)]
    pub secret: String,
}

#[derive(Debug, Args)]
pub struct RemoteArgs {
    /// Base URL of the gateway.
    #[arg(long, default_value = "http://127.0.0.1:7400")]
    pub gateway: String,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Base URL of the gateway.
    #[arg(long, default_value = "http://127.0.0.1:7400")]
    pub gateway: String,
    /// Target agent id.
    pub agent: String,
    /// Task type to execute, e.g. "add".
    pub task_type: String,
    /// Task data as a JSON object.
    #[arg(default_value = "{}")]
    pub data: String,
    /// Seconds to wait for the result.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_send() {
        let cli = Cli::parse_from([
            "agora", "send", "calc-1", "add", r#"{"a":2,"b":3}"#, "--timeout", "5",
        ]);
        match cli.command {
            Commands::Send(args) => {
                assert_eq!(args.agent, "calc-1");
                assert_eq!(args.task_type, "add");
                assert_eq!(args.timeout, 5);
            }
            other => panic!("Expected Send, got {other:?}"),
        }
    }
}
