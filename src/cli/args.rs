use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{BootstrapConfig, OperatorKind};

/// vault-bootstrap - bring a local Vault from a cold container to an
/// unsealed, provisioned state
#[derive(Parser)]
#[command(name = "vault-bootstrap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ./vault-bootstrap.toml if present)
    #[arg(short, long, global = true, env = "VAULT_BOOTSTRAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip the Colima and Docker network checks
    #[arg(long, global = true)]
    pub skip_preflight: bool,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start, initialize, unseal and provision Vault
    Setup {
        /// Print the root token in the summary
        #[arg(long)]
        show_token: bool,
    },
    /// Run setup, then create an AppRole and issue credentials for it
    Approle {
        /// Role name
        #[arg(long)]
        role: String,

        /// Policy to attach (repeatable)
        #[arg(long = "policy")]
        policies: Vec<String>,

        /// Token TTL for logins with this role
        #[arg(long, default_value = "1h")]
        ttl: String,

        /// Write the credentials as JSON to this file
        #[arg(long)]
        save_to: Option<PathBuf>,
    },
    /// Probe Vault and show its current state
    Status,
}

/// Flags that take precedence over the config file and environment.
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    /// Vault address as seen from this machine
    #[arg(long, global = true)]
    pub vault_addr: Option<String>,

    /// Directory holding the Vault compose file
    #[arg(long, global = true)]
    pub service_dir: Option<PathBuf>,

    /// Where init material is stored
    #[arg(long, global = true)]
    pub keys_file: Option<PathBuf>,

    /// External Docker network the compose project joins
    #[arg(long, global = true)]
    pub network: Option<String>,

    /// How init and unseal are issued: container or http
    #[arg(long, global = true)]
    pub operator: Option<OperatorKind>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut BootstrapConfig) {
        if let Some(addr) = &self.vault_addr {
            config.vault_addr = addr.clone();
        }
        if let Some(dir) = &self.service_dir {
            config.service_dir = Some(dir.clone());
        }
        if let Some(path) = &self.keys_file {
            config.keys_file = Some(path.clone());
        }
        if let Some(network) = &self.network {
            config.network = Some(network.clone());
        }
        if let Some(operator) = self.operator {
            config.operator = operator;
        }
    }
}
