//! elastauth - credential broker and transparent proxy for Elasticsearch

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use elastauth::{
    cli::{Cli, Command},
    config::Config,
    crypto,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.effective_command() {
        Command::GenerateKey => {
            println!("{}", crypto::generate_key());
            ExitCode::SUCCESS
        }
        Command::Serve => run_server(cli).await,
    }
}

/// Run the server
async fn run_server(cli: Cli) -> ExitCode {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(listen) = cli.listen {
                config.listen = listen;
            }
            if let Some(level) = cli.log_level {
                config.log_level = level;
            }
            if let Some(format) = cli.log_format {
                config.log_format = format;
            }
            config
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = setup_tracing(&config.log_level, Some(config.log_format.as_str())) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    if config.ensure_secret_key() {
        warn!("No secret_key configured, generated a temporary one; cached credentials will not survive a restart");
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = config.auth_provider.as_str(),
        proxy = config.proxy.enabled,
        "Starting elastauth"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
