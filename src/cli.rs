//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Credential broker and transparent proxy for Elasticsearch
#[derive(Parser, Debug)]
#[command(name = "elastauth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ELASTAUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:5000
    #[arg(long, env = "ELASTAUTH_LISTEN")]
    pub listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ELASTAUTH_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, env = "ELASTAUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Print a new secret key and exit
    #[arg(long)]
    pub generate_key: bool,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Print a new 64 hex character secret key
    GenerateKey,
}

impl Cli {
    /// Subcommand to run, folding `--generate-key` into [`Command::GenerateKey`]
    #[must_use]
    pub fn effective_command(&self) -> Command {
        match self.command {
            Some(Command::GenerateKey) => Command::GenerateKey,
            _ if self.generate_key => Command::GenerateKey,
            _ => Command::Serve,
        }
    }
}
