use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod bootstrap;
mod cli;
mod command;
mod config;
mod credentials;
mod docker;
mod error;
mod keys;
mod preflight;
mod secure_file;
mod shell;
mod vault;

#[cfg(test)]
mod testing;

use cli::{Cli, Commands};
use config::BootstrapConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error [config]: {:#}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Setup { show_token } => {
            command::run_setup(config, cli.skip_preflight, show_token).await
        }
        Commands::Approle {
            role,
            policies,
            ttl,
            save_to,
        } => {
            command::run_approle(
                config,
                cli.skip_preflight,
                &role,
                &policies,
                &ttl,
                save_to.as_deref(),
            )
            .await
        }
        Commands::Status => command::run_status(config).await,
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.kind(), e);
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<BootstrapConfig> {
    let mut config =
        BootstrapConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
