//! Shared fakes and builders for agent tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use crate::agent::Agent;
use crate::auth::{self, Token};
use crate::config::{AgentConfig, CONTAINER_CACHE_DIR, CustomWorkerConfig, NetworkMode};
use crate::docker::{ContainerDriver, ContainerSpec, ContainerState, DriverError};

/// In-memory [`ContainerDriver`] recording every call. Each container
/// reports `running` on its first inspect and an exit on the second.
pub(crate) struct FakeDriver {
    pub pulls: Mutex<Vec<String>>,
    pub created: Mutex<Vec<ContainerSpec>>,
    pub started: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    inspect_counts: Mutex<HashMap<String, u32>>,
    pub exit_code: AtomicI64,
    pub fail_pull: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_inspect: AtomicBool,
}

impl FakeDriver {
    pub fn exits_with(exit_code: i64) -> Self {
        Self {
            pulls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            inspect_counts: Mutex::new(HashMap::new()),
            exit_code: AtomicI64::new(exit_code),
            fail_pull: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_inspect: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn pull_image(&self, image_uri: &str, _platform: &str) -> Result<(), DriverError> {
        if self.fail_pull.load(Ordering::SeqCst) {
            return Err(DriverError::PullFailed {
                reason: "fake pull failure".to_string(),
            });
        }
        self.pulls.lock().unwrap().push(image_uri.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DriverError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DriverError::CreateFailed {
                reason: "fake create failure".to_string(),
            });
        }
        let mut created = self.created.lock().unwrap();
        created.push(spec.clone());
        Ok(format!("ctr-{}", created.len()))
    }

    async fn start_container(&self, id: &str) -> Result<(), DriverError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DriverError::StartFailed {
                reason: "fake start failure".to_string(),
            });
        }
        self.started.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DriverError> {
        if self.fail_inspect.load(Ordering::SeqCst) {
            return Err(DriverError::InspectFailed {
                reason: "fake inspect failure".to_string(),
            });
        }
        let mut counts = self.inspect_counts.lock().unwrap();
        let count = counts.entry(id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            Ok(ContainerState {
                status: "running".to_string(),
                running: true,
                exit_code: 0,
                error: String::new(),
            })
        } else {
            let exit_code = self.exit_code.load(Ordering::SeqCst);
            Ok(ContainerState {
                status: "exited".to_string(),
                running: false,
                exit_code,
                error: if exit_code == 0 {
                    String::new()
                } else {
                    "task failed".to_string()
                },
            })
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), DriverError> {
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Configuration pointed at a mock control plane, with sleeps collapsed so
/// tests run fast.
pub(crate) fn test_config(dir: &Path, api_host: &str) -> AgentConfig {
    let worker_dir = dir.join("worker");
    AgentConfig {
        api_host: api_host.to_string(),
        auth_host: "http://127.0.0.1:1".to_string(),
        client_id: "client-id".to_string(),
        name: "fred".to_string(),
        pool_labels: vec!["small".to_string()],
        username: String::new(),
        password: String::new(),
        privileged: false,
        network_mode: NetworkMode::Bridge,
        custom_worker_config: CustomWorkerConfig {
            mounts: Vec::new(),
            env_vars: Vec::new(),
            cache_dir: CONTAINER_CACHE_DIR.to_string(),
        },
        host_docker_config_dir: dir.join(".docker"),
        host_aws_config_dir: None,
        host_aws_config_exists: false,
        experience_cache_dir: worker_dir.join("cache"),
        worker_dir,
        agent_error_sleep: Duration::ZERO,
        worker_exit_sleep: Duration::ZERO,
        container_watch_interval: Duration::from_millis(1),
        max_error_count: 10,
        one_task: false,
        remove_worker_dir: false,
        remove_experience_cache: false,
        auto_update: false,
        log_level: "debug".to_string(),
        log_max_filesize_mb: 500,
        config_dir: dir.to_path_buf(),
    }
}

/// Seed the credential cache with a valid token for org `acme` and build the
/// agent on top of it, so no auth server is involved.
pub(crate) async fn test_agent(
    config: AgentConfig,
    driver: std::sync::Arc<dyn ContainerDriver>,
) -> Agent {
    let access_token =
        auth::unsigned_token(serde_json::json!({ auth::ORG_CLAIM: "acme" }));
    let token = Token {
        access_token,
        token_type: "Bearer".to_string(),
        refresh_token: String::new(),
        expiry: Utc::now() + ChronoDuration::hours(1),
    };
    std::fs::create_dir_all(&config.config_dir).unwrap();
    std::fs::write(
        config.credential_cache_path(),
        serde_json::to_vec(&token).unwrap(),
    )
    .unwrap();

    Agent::new(config, driver).await.unwrap()
}

/// A complete check-in assignment for the given image.
pub(crate) fn checkin_body(image: &str) -> serde_json::Value {
    serde_json::json!({
        "workerImageURI": image,
        "workerEnvironmentVariables": [["X", "1"]],
        "authToken": "t",
    })
}
