//! CLI module for Sketchwire
//!
//! Provides commands:
//! - `serve`: Run the collaboration server
//! - `config`: Inspect the resolved configuration

use clap::{Parser, Subcommand, ValueEnum};

pub mod config;

/// Sketchwire collaboration server CLI
#[derive(Parser, Debug)]
#[command(name = "sketchwire")]
#[command(about = "Real-time collaborative canvas server")]
#[command(version)]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server
    Serve,
    /// Inspect configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve) => crate::server::run().await,
        Some(Commands::Config(cmd)) => config::run(cmd),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
