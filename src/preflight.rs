//! Pre-flight checks run before any container work: the local VM runtime
//! must be up and the shared Docker network must exist.

use std::sync::Arc;

use tracing::{info, warn};

use crate::docker::ComposeDriver;
use crate::error::{BootstrapError, BootstrapResult};
use crate::shell::{ShellCommand, ShellRunner};

/// Start the Colima VM if it is not already running.
///
/// A failing `colima status` only means we could not tell; in that case the
/// runtime is started anyway.
pub async fn ensure_runtime(shell: &Arc<dyn ShellRunner>) -> BootstrapResult<()> {
    info!("Checking Colima status...");

    match shell.run(&ShellCommand::new("colima").arg("status")).await {
        Ok(output) if output.success && is_running(&output.stdout, &output.stderr) => {
            info!("Colima is running");
            return Ok(());
        }
        Ok(_) => info!("Colima is not running, starting it"),
        Err(e) => warn!("Could not determine Colima status ({}), starting it", e),
    }

    let output = shell
        .run(&ShellCommand::new("colima").arg("start"))
        .await?;
    if !output.success {
        return Err(BootstrapError::Container(format!(
            "Failed to start Colima: {}",
            output.stderr
        )));
    }
    info!("Colima started");
    Ok(())
}

// Colima prints its status on stderr in recent versions.
fn is_running(stdout: &str, stderr: &str) -> bool {
    stdout.contains("Running") || stderr.contains("running")
}

/// Run all pre-flight checks in order.
pub async fn run(
    shell: &Arc<dyn ShellRunner>,
    compose: &ComposeDriver,
    network: Option<&str>,
) -> BootstrapResult<()> {
    ensure_runtime(shell).await?;
    compose.ensure_network(network).await
}
