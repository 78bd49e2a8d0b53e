use std::sync::Arc;

use tracing::info;

use crate::bootstrap::{BootstrapReport, Bootstrapper};
use crate::config::BootstrapConfig;
use crate::docker::ComposeDriver;
use crate::error::BootstrapResult;
use crate::preflight;
use crate::shell::{ShellRunner, SystemShell};

/// Build a bootstrapper on the system shell, running pre-flight checks first
/// unless told not to.
pub(super) async fn prepare(
    config: BootstrapConfig,
    skip_preflight: bool,
) -> BootstrapResult<Bootstrapper> {
    let shell: Arc<dyn ShellRunner> = Arc::new(SystemShell);

    if skip_preflight {
        info!("Skipping pre-flight checks");
    } else {
        let compose = ComposeDriver::new(shell.clone());
        preflight::run(&shell, &compose, config.network.as_deref()).await?;
    }

    Bootstrapper::from_config(config, shell)
}

pub async fn run_setup(
    config: BootstrapConfig,
    skip_preflight: bool,
    show_token: bool,
) -> BootstrapResult<()> {
    let mut bootstrapper = prepare(config, skip_preflight).await?;
    let report = bootstrapper.setup().await?;
    print_summary(&report, show_token);
    Ok(())
}

pub(super) fn print_summary(report: &BootstrapReport, show_token: bool) {
    println!("✅ Vault is {} at {}", report.state, report.address);
    if report.initialized_now {
        println!("   Initialized now; key material saved to {}", report.keys_file.display());
    } else {
        println!("   Key material: {}", report.keys_file.display());
    }
    if report.unseal_keys_applied > 0 {
        println!("   Unsealed with {} key(s)", report.unseal_keys_applied);
    }
    println!("   KV v2 engine: {}", report.engine);
    println!();
    println!("export VAULT_ADDR={}", report.address);
    if show_token {
        println!("export VAULT_TOKEN={}", report.root_token);
    } else {
        println!("# root token stored in the credential store; pass --show-token to print it");
    }
}
