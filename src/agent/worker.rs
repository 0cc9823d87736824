//! Worker container lifecycle: environment and mount construction, the
//! create/start/watch/remove sequence.
//!
//! Environment ordering matters to the worker and is fixed: the static set,
//! the privileged flag, the check-in pairs, pool labels, the custom worker
//! config JSON, and finally the worker type. A non-zero worker exit is the
//! worker's problem and is only logged; any create/start/inspect failure
//! triggers a best-effort removal before the error propagates.

use uuid::Uuid;

use crate::agent::AgentError;
use crate::agent::run_loop::{Agent, PLATFORM};
use crate::docker::{ContainerSpec, DriverError};

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const CONTAINER_DOCKER_CONFIG_DIR: &str = "/root/.docker";
const CONTAINER_AWS_CONFIG_DIR: &str = "/root/.aws";

impl Agent {
    /// Launch one worker container for the current assignment and watch it
    /// until exit.
    pub(super) async fn run_worker(
        &self,
        image: &str,
        checkin_env: &[String],
        attempt: u32,
    ) -> Result<(), AgentError> {
        let worker_uuid = Uuid::new_v4();
        let name = format!("worker-{worker_uuid}");

        let spec = ContainerSpec {
            image: image.to_string(),
            name: name.clone(),
            env: self.build_worker_env(&self.worker_id(worker_uuid), checkin_env),
            binds: self.build_binds(),
            network_mode: self.config.network_mode.as_str().to_string(),
            privileged: self.config.privileged,
            platform: PLATFORM.to_string(),
        };

        tracing::info!(image, container = %name, "starting worker");
        let container = match self.driver.create_container(&spec).await {
            Ok(id) => id,
            Err(source) => {
                self.remove_best_effort(&name).await;
                return Err(AgentError::Worker { attempt, source });
            }
        };

        if let Err(source) = self.driver.start_container(&container).await {
            self.remove_best_effort(&container).await;
            return Err(AgentError::Worker { attempt, source });
        }

        if let Err(source) = self.watch(&container).await {
            self.remove_best_effort(&container).await;
            return Err(AgentError::Worker { attempt, source });
        }

        tokio::time::sleep(self.config.worker_exit_sleep).await;
        self.driver
            .remove_container(&container)
            .await
            .map_err(|source| AgentError::Worker { attempt, source })
    }

    /// Poll the container until it stops running.
    async fn watch(&self, container: &str) -> Result<(), DriverError> {
        loop {
            tokio::time::sleep(self.config.container_watch_interval).await;
            let state = self.driver.inspect_container(container).await?;
            tracing::debug!(container, status = %state.status, "worker container state");

            if !state.is_running() {
                if state.exit_code == 0 {
                    tracing::info!(container, "worker succeeded");
                } else {
                    tracing::warn!(
                        container,
                        exit_code = state.exit_code,
                        error = %state.error,
                        "worker exited with error"
                    );
                }
                return Ok(());
            }
        }
    }

    async fn remove_best_effort(&self, container: &str) {
        if let Err(err) = self.driver.remove_container(container).await {
            tracing::warn!(container, error = %err, "best-effort worker removal failed");
        }
    }

    /// The identity the worker registers under:
    /// `agent-<org>|<agentName>|<uuid>`.
    pub(super) fn worker_id(&self, worker_uuid: Uuid) -> String {
        format!("agent-{}|{}|{}", self.org_name, self.config.name, worker_uuid)
    }

    fn build_worker_env(&self, worker_id: &str, checkin_env: &[String]) -> Vec<String> {
        let mut env = vec![
            "RERUN_WORKER_ENVIRONMENT=dev".to_string(),
            "RERUN_WORKER_REUSABLE=true".to_string(),
            format!(
                "RERUN_WORKER_DOCKER_NETWORK_MODE={}",
                self.config.network_mode.as_str()
            ),
            format!("RERUN_WORKER_WORKER_ID={worker_id}"),
        ];
        if self.config.privileged {
            env.push("RERUN_WORKER_PRIVILEGED=true".to_string());
        }
        env.extend(checkin_env.iter().cloned());
        env.push(format!(
            "RERUN_WORKER_POOL_LABELS={}",
            self.config.pool_labels.join(",")
        ));
        env.push(format!(
            "RERUN_WORKER_CUSTOM_WORKER_CONFIG={}",
            self.custom_worker_config_json
        ));
        env.push("RERUN_WORKER_WORKER_TYPE=agent".to_string());
        env
    }

    fn build_binds(&self) -> Vec<String> {
        let mut binds = vec![
            format!("{DOCKER_SOCKET}:{DOCKER_SOCKET}"),
            format!(
                "{}:{}",
                self.config.worker_dir.display(),
                self.config.worker_dir.display()
            ),
            format!(
                "{}:{CONTAINER_DOCKER_CONFIG_DIR}",
                self.config.host_docker_config_dir.display()
            ),
        ];
        if let (Some(aws_dir), true) = (
            &self.config.host_aws_config_dir,
            self.config.host_aws_config_exists,
        ) {
            binds.push(format!("{}:{CONTAINER_AWS_CONFIG_DIR}", aws_dir.display()));
        }
        binds.push(format!(
            "{}:{}",
            self.config.experience_cache_dir.display(),
            self.config.custom_worker_config.cache_dir
        ));
        binds
    }
}
