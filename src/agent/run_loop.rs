//! The agent's main state machine.
//!
//! Each iteration fully completes before the next begins: check in, pull the
//! worker image when it changed, run the worker container to completion,
//! remove it, sleep. Consecutive failures accumulate in an error budget;
//! exceeding `max_error_count` terminates the loop with the last error. Any
//! fully-successful iteration resets the budget to zero.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::agent::AgentError;
use crate::agent::heartbeat::HeartbeatTicker;
use crate::api::{ControlPlaneClient, stringify_environment_variables};
use crate::auth::{self, TokenManager};
use crate::config::AgentConfig;
use crate::docker::{ContainerDriver, DriverError};

pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform requested for image pulls and worker containers.
pub const PLATFORM: &str = "linux/amd64";

/// Coarse agent state, reported by the heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Error,
}

pub struct Agent {
    pub(super) config: AgentConfig,
    pub(super) driver: Arc<dyn ContainerDriver>,
    pub(super) client: Arc<ControlPlaneClient>,
    pub(super) tokens: Arc<TokenManager>,
    pub(super) org_name: String,
    pub(super) custom_worker_config_json: String,
    /// Last image URI announced by the control plane. Written by check-in
    /// (main loop and heartbeat), read by the pull decision.
    pub(super) image: Arc<RwLock<Option<String>>>,
    pub(super) status: Arc<RwLock<AgentStatus>>,
    /// Owned by the run loop; never shared.
    pub(super) last_pulled_image: String,
    pub(super) error_count: u32,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("org_name", &self.org_name)
            .field("last_pulled_image", &self.last_pulled_image)
            .field("error_count", &self.error_count)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Authenticate, resolve the organization identity, and build the
    /// control-plane client. Fails fast when the token carries no org claim.
    pub async fn new(
        config: AgentConfig,
        driver: Arc<dyn ContainerDriver>,
    ) -> Result<Self, AgentError> {
        let tokens = Arc::new(TokenManager::new(
            &config.auth_host,
            &config.client_id,
            &config.username,
            &config.password,
            config.credential_cache_path(),
        ));

        let token = tokens.get_token().await?;
        let org_name = auth::org_name_from_token(&token.access_token)?;
        tracing::info!(org = %org_name, name = %config.name, "agent identity resolved");

        let client = Arc::new(ControlPlaneClient::new(
            &config.api_host,
            &config.name,
            AGENT_VERSION,
            config.pool_labels.clone(),
            tokens.clone(),
        ));

        let custom_worker_config_json = serde_json::to_string(&config.custom_worker_config)?;

        Ok(Self {
            config,
            driver,
            client,
            tokens,
            org_name,
            custom_worker_config_json,
            image: Arc::new(RwLock::new(None)),
            status: Arc::new(RwLock::new(AgentStatus::Idle)),
            last_pulled_image: String::new(),
            error_count: 0,
        })
    }

    /// Run until one-task completion or error-budget exhaustion. The
    /// credential cache is flushed on any terminal return.
    pub async fn run(&mut self) -> Result<(), AgentError> {
        ensure_dir(&self.config.worker_dir)?;
        ensure_dir(&self.config.experience_cache_dir)?;
        if self.config.auto_update {
            tracing::debug!("auto-update enabled; release downloads are handled externally");
        }

        let heartbeat = HeartbeatTicker::new(
            self.client.clone(),
            self.image.clone(),
            self.status.clone(),
        )
        .spawn();

        let result = self.run_loop().await;

        heartbeat.abort();
        self.tokens.flush().await;
        if self.config.remove_experience_cache {
            if let Err(err) = std::fs::remove_dir_all(&self.config.experience_cache_dir) {
                tracing::warn!(error = %err, "failed to remove experience cache");
            }
        }
        result
    }

    async fn run_loop(&mut self) -> Result<(), AgentError> {
        let mut last_error: Option<AgentError> = None;

        loop {
            if self.error_count > self.config.max_error_count {
                tracing::error!(errors = self.error_count, "error budget exhausted");
                if self.config.remove_worker_dir {
                    self.clean_worker_dir();
                }
                return Err(last_error.take().unwrap_or(AgentError::ErrorBudgetExhausted {
                    count: self.error_count,
                }));
            }

            let attempt = self.error_count + 1;
            match self.iteration(attempt).await {
                Ok(()) => {
                    self.error_count = 0;
                    if self.config.one_task {
                        tracing::info!("one-task mode complete");
                        return Ok(());
                    }
                }
                Err(err) => {
                    self.error_count += 1;
                    *self.status.write().await = AgentStatus::Error;
                    tracing::warn!(error = %err, errors = self.error_count, "agent iteration failed");
                    last_error = Some(err);
                }
            }

            tokio::time::sleep(self.config.agent_error_sleep).await;
        }
    }

    /// One pass of the state machine: check in, validate the assignment,
    /// pull when the image changed, run the worker.
    async fn iteration(&mut self, attempt: u32) -> Result<(), AgentError> {
        let assignment = self
            .client
            .checkin()
            .await
            .map_err(|source| AgentError::Checkin { attempt, source })?;

        if let Some(uri) = &assignment.worker_image_uri {
            *self.image.write().await = Some(uri.clone());
        } else {
            return Err(AgentError::NoWorkerImage { attempt });
        }
        let env_pairs = assignment
            .worker_environment_variables
            .ok_or(AgentError::NoWorkerEnvironment { attempt })?;
        if assignment.auth_token.is_none() {
            return Err(AgentError::NoAuthToken { attempt });
        }

        *self.status.write().await = AgentStatus::Running;

        let image = self
            .maybe_pull()
            .await
            .map_err(|source| AgentError::Pull { attempt, source })?;

        let env = stringify_environment_variables(&env_pairs);
        let result = self.run_worker(&image, &env, attempt).await;
        *self.status.write().await = AgentStatus::Idle;
        result
    }

    /// Pull only when the announced image differs from the last pulled one.
    async fn maybe_pull(&mut self) -> Result<String, DriverError> {
        let desired = self.image.read().await.clone().unwrap_or_default();
        if desired != self.last_pulled_image {
            self.driver.pull_image(&desired, PLATFORM).await?;
            self.last_pulled_image = desired.clone();
        }
        Ok(desired)
    }

    /// Clear the worker directory, keeping the `cache/` subdirectory.
    fn clean_worker_dir(&self) {
        let entries = match std::fs::read_dir(&self.config.worker_dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read worker dir for cleanup");
                return;
            }
        };

        for entry in entries.flatten() {
            if entry.file_name() == "cache" {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            if let Err(err) = removed {
                tracing::warn!(path = %path.display(), error = %err, "failed to clean worker dir entry");
            }
        }
    }
}

fn ensure_dir(path: &std::path::Path) -> Result<(), AgentError> {
    std::fs::create_dir_all(path).map_err(|source| AgentError::Io {
        path: path.to_path_buf(),
        source,
    })
}
