//! Docker Compose and network collaborator.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{BootstrapError, BootstrapResult};
use crate::shell::{ShellCommand, ShellRunner};

/// Start/stop/query a Compose project.
#[async_trait]
pub trait ContainerLifecycle: Send + Sync {
    async fn compose_up(&self, directory: &Path) -> BootstrapResult<()>;
    async fn compose_down(&self, directory: &Path) -> BootstrapResult<()>;
    async fn compose_ps(&self, directory: &Path) -> BootstrapResult<String>;
}

/// `docker compose` driven through a [`ShellRunner`].
#[derive(Clone)]
pub struct ComposeDriver {
    shell: Arc<dyn ShellRunner>,
}

impl ComposeDriver {
    pub fn new(shell: Arc<dyn ShellRunner>) -> Self {
        Self { shell }
    }

    async fn compose(&self, directory: &Path, args: &[&str]) -> BootstrapResult<String> {
        let command = ShellCommand::new("docker")
            .arg("compose")
            .args(args.iter().copied())
            .current_dir(directory);
        let output = self.shell.run(&command).await?;
        if !output.success {
            return Err(BootstrapError::Container(format!(
                "`{}` failed in {}: {}",
                command.display(),
                directory.display(),
                output.stderr
            )));
        }
        Ok(output.stdout)
    }

    /// Make sure the external Docker network exists, creating it if needed.
    pub async fn ensure_network(&self, name: Option<&str>) -> BootstrapResult<()> {
        let name = name.filter(|n| !n.trim().is_empty()).ok_or_else(|| {
            BootstrapError::Config("DOCKER_EXTERNAL_NETWORK is not defined".to_string())
        })?;

        let list = ShellCommand::new("docker").args([
            "network".to_string(),
            "ls".to_string(),
            "--filter".to_string(),
            format!("name=^{}$", name),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ]);
        let output = self.shell.run(&list).await?;
        if !output.success {
            return Err(BootstrapError::Container(format!(
                "Failed to list docker networks: {}",
                output.stderr
            )));
        }

        if output.stdout.lines().any(|line| line.trim() == name) {
            info!("Network '{}' already exists", name);
            return Ok(());
        }

        info!("Network '{}' not found, creating it", name);
        let create = ShellCommand::new("docker").args(["network", "create", name]);
        let output = self.shell.run(&create).await?;
        if !output.success {
            return Err(BootstrapError::Container(format!(
                "Failed to create docker network '{}': {}",
                name, output.stderr
            )));
        }
        info!("Network '{}' created", name);
        Ok(())
    }
}

#[async_trait]
impl ContainerLifecycle for ComposeDriver {
    async fn compose_up(&self, directory: &Path) -> BootstrapResult<()> {
        self.compose(directory, &["up", "-d"]).await.map(|_| ())
    }

    async fn compose_down(&self, directory: &Path) -> BootstrapResult<()> {
        self.compose(directory, &["down"]).await.map(|_| ())
    }

    async fn compose_ps(&self, directory: &Path) -> BootstrapResult<String> {
        self.compose(directory, &["ps"]).await
    }
}
