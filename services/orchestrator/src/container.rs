use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Everything needed to launch one runtime container.
#[derive(Clone, Debug)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    /// Host port published to the container's runtime port.
    pub host_port: u16,
    pub container_port: u16,
    /// Host directory mounted for model-weight caching.
    pub volume_dir: PathBuf,
    pub volume_mount: String,
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("'{command}' failed ({status}): {stderr}")]
    Exited {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("host port {0} is already bound")]
    PortConflict(u16),
}

/// Seam to the container engine, so tests can stand in a fake.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Makes sure the base image is present locally, pulling on miss.
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError>;
    /// Launches a detached container per `spec`.
    async fn run(&self, spec: &ContainerSpec) -> Result<(), ContainerError>;
    async fn stop(&self, name: &str) -> Result<(), ContainerError>;
    async fn remove(&self, name: &str, force: bool) -> Result<(), ContainerError>;
    async fn exists(&self, name: &str) -> Result<bool, ContainerError>;
    /// Names of all containers (running or not) carrying `prefix`.
    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, ContainerError>;
}

/// Drives the local `docker` binary.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    async fn output(&self, args: &[&str]) -> Result<std::process::Output, ContainerError> {
        let command = format!("{} {}", self.binary, args.join(" "));
        let out = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !out.status.success() {
            return Err(ContainerError::Exited {
                command,
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(out)
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ensure_image(&self, image: &str) -> Result<(), ContainerError> {
        if self.output(&["image", "inspect", image]).await.is_ok() {
            return Ok(());
        }

        info!(image, "pulling runtime image");
        let command = format!("{} pull {}", self.binary, image);
        let mut child = Command::new(&self.binary)
            .args(["pull", image])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Progress arrives line by line on stdout; relay it.
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(image, "{line}");
            }
        }

        let out = child
            .wait_with_output()
            .await
            .map_err(|source| ContainerError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !out.status.success() {
            return Err(ContainerError::Exited {
                command,
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let publish = format!("{}:{}", spec.host_port, spec.container_port);
        let volume = format!("{}:{}", spec.volume_dir.display(), spec.volume_mount);
        let res = self
            .output(&[
                "run", "-d", "--rm", "--name", &spec.name, "-p", &publish, "-v", &volume,
                &spec.image,
            ])
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(ContainerError::Exited { stderr, .. })
                if stderr.contains("port is already allocated")
                    || stderr.contains("address already in use") =>
            {
                Err(ContainerError::PortConflict(spec.host_port))
            }
            Err(e) => Err(e),
        }
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        self.output(&["stop", name]).await.map(|_| ())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), ContainerError> {
        let res = if force {
            self.output(&["rm", "-f", name]).await
        } else {
            self.output(&["rm", name]).await
        };
        match res {
            Ok(_) => Ok(()),
            // already gone is as good as removed
            Err(ContainerError::Exited { stderr, .. }) if stderr.contains("No such container") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, ContainerError> {
        match self.output(&["container", "inspect", name]).await {
            Ok(_) => Ok(true),
            Err(ContainerError::Exited { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, ContainerError> {
        let filter = format!("name={prefix}");
        let out = self
            .output(&["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;
        let names = String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            // the docker name filter matches substrings; keep prefixes only
            .filter(|n| n.starts_with(prefix))
            .map(str::to_string)
            .collect();
        Ok(names)
    }
}
