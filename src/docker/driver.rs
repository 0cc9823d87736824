//! Container runtime abstraction and its Docker implementation.
//!
//! The run loop is the only caller; no concurrent use is required. The trait
//! seam exists so the loop can be exercised against an in-memory runtime.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Docker not available: {reason}")]
    Unavailable { reason: String },

    #[error("image pull failed: {reason}")]
    PullFailed { reason: String },

    #[error("container create failed: {reason}")]
    CreateFailed { reason: String },

    #[error("container start failed: {reason}")]
    StartFailed { reason: String },

    #[error("container inspect failed: {reason}")]
    InspectFailed { reason: String },

    #[error("container remove failed: {reason}")]
    RemoveFailed { reason: String },
}

/// Everything needed to create a worker container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub network_mode: String,
    pub privileged: bool,
    pub platform: String,
}

/// Observed container state, as reported by inspect.
#[derive(Debug, Clone, Default)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub exit_code: i64,
    pub error: String,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn pull_image(&self, image_uri: &str, platform: &str) -> Result<(), DriverError>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError>;
    async fn start_container(&self, id: &str) -> Result<(), DriverError>;
    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DriverError>;

    /// Remove the container and its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), DriverError>;
}

/// [`ContainerDriver`] backed by the local Docker daemon.
pub struct DockerDriver {
    docker: Docker,
}

impl DockerDriver {
    /// Connect via `DOCKER_HOST` or the default socket.
    pub fn connect() -> Result<Self, DriverError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| DriverError::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn pull_image(&self, image_uri: &str, platform: &str) -> Result<(), DriverError> {
        let options = CreateImageOptions {
            from_image: image_uri.to_string(),
            platform: platform.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::debug!(image = image_uri, "pull: {}", status);
                    }
                }
                Err(e) => {
                    return Err(DriverError::PullFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(image = image_uri, "pulled image");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        let host_config = HostConfig {
            binds: Some(spec.binds.clone()),
            network_mode: Some(spec.network_mode.clone()),
            privileged: Some(spec.privileged),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: Some(spec.platform.clone()),
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| DriverError::CreateFailed {
                reason: e.to_string(),
            })?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DriverError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DriverError::StartFailed {
                reason: e.to_string(),
            })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DriverError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| DriverError::InspectFailed {
                reason: e.to_string(),
            })?;

        let state = response.state.unwrap_or_default();
        Ok(ContainerState {
            status: state.status.map(|s| s.to_string()).unwrap_or_default(),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code.unwrap_or(0),
            error: state.error.unwrap_or_default(),
        })
    }

    async fn remove_container(&self, id: &str) -> Result<(), DriverError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| DriverError::RemoveFailed {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_running() {
        let state = ContainerState {
            status: "running".to_string(),
            running: true,
            ..Default::default()
        };
        assert!(state.is_running());

        let state = ContainerState {
            status: "exited".to_string(),
            exit_code: 1,
            ..Default::default()
        };
        assert!(!state.is_running());
    }

    #[tokio::test]
    async fn test_docker_connection() {
        // Requires a running Docker daemon; skip quietly otherwise.
        let Ok(driver) = DockerDriver::connect() else {
            eprintln!("Skipping Docker test: Docker not available");
            return;
        };
        let _available = driver.ping().await;
    }
}
