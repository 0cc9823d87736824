//! Agent configuration.
//!
//! Loaded from `<configDir>/config.yaml` (default `~/resim/config.yaml`),
//! with every key overridable through a `RESIM_AGENT_*` environment variable
//! (dashes become underscores, upper-cased: `api-host` -> `RESIM_AGENT_API_HOST`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const API_HOST_DEFAULT: &str = "https://agentapi.resim.ai/agent/v1";
pub const AUTH_HOST_DEFAULT: &str = "https://resim.us.auth0.com";
pub const WORKER_DIR_DEFAULT: &str = "/tmp/resim";
pub const CONFIG_FILENAME: &str = "config.yaml";
pub const CREDENTIAL_CACHE_FILENAME: &str = "cache.json";

/// Cache path inside the worker container; the host experience cache is
/// bind-mounted here.
pub const CONTAINER_CACHE_DIR: &str = "/tmp/resim/cache";

const ENV_PREFIX: &str = "RESIM_AGENT";

const PROD_CLIENT_ID: &str = "LuOA13rPDTFSyY9zWPWNipVP9GIzJMzs";
const DEV_CLIENT_ID: &str = "xJv0jqeP7QdPOsUidorgDlj4Mi74gVEW";

const AGENT_ERROR_SLEEP_DEFAULT_SECS: u64 = 10;
const WORKER_EXIT_SLEEP_DEFAULT_SECS: u64 = 5;
const CONTAINER_WATCH_INTERVAL_DEFAULT_SECS: u64 = 10;
const MAX_ERROR_COUNT_DEFAULT: u32 = 10;
const LOG_MAX_FILESIZE_DEFAULT_MB: u64 = 500;

/// Errors raised while loading or validating configuration. All of these are
/// fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to determine home directory")]
    NoHomeDir,

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0} must be set")]
    MissingKey(&'static str),

    #[error("invalid docker network mode '{0}', expected 'bridge' or 'host'")]
    InvalidNetworkMode(String),

    #[error("invalid mount '{0}', expected 'source:target'")]
    InvalidMount(String),

    #[error("invalid environment variable '{0}', expected 'KEY=value'")]
    InvalidEnvVar(String),
}

/// Network mode for the worker container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Bridge,
    Host,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
        }
    }
}

impl std::str::FromStr for NetworkMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bridge" => Ok(NetworkMode::Bridge),
            "host" => Ok(NetworkMode::Host),
            _ => Err(ConfigError::InvalidNetworkMode(s.to_string())),
        }
    }
}

/// A host path bind-mounted into the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
}

/// A single `KEY=value` pair forwarded to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

/// Operator-supplied worker customization, serialized as JSON and handed to
/// the worker in a single environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomWorkerConfig {
    pub mounts: Vec<Mount>,
    pub env_vars: Vec<EnvVar>,
    pub cache_dir: String,
}

/// Immutable agent configuration, fully resolved at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_host: String,
    pub auth_host: String,
    pub client_id: String,
    pub name: String,
    pub pool_labels: Vec<String>,
    pub username: String,
    pub password: String,
    pub privileged: bool,
    pub network_mode: NetworkMode,
    pub custom_worker_config: CustomWorkerConfig,
    pub host_docker_config_dir: PathBuf,
    pub host_aws_config_dir: Option<PathBuf>,
    pub host_aws_config_exists: bool,
    pub worker_dir: PathBuf,
    pub experience_cache_dir: PathBuf,
    pub agent_error_sleep: Duration,
    pub worker_exit_sleep: Duration,
    pub container_watch_interval: Duration,
    pub max_error_count: u32,
    pub one_task: bool,
    pub remove_worker_dir: bool,
    pub remove_experience_cache: bool,
    pub auto_update: bool,
    pub log_level: String,
    pub log_max_filesize_mb: u64,
    pub config_dir: PathBuf,
}

/// Raw shape of the YAML file. Every key is optional here; validation happens
/// when building the resolved [`AgentConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
struct RawConfig {
    api_host: Option<String>,
    auth_host: Option<String>,
    client_id: Option<String>,
    name: Option<String>,
    pool_labels: Option<Vec<String>>,
    username: Option<String>,
    password: Option<String>,
    privileged: Option<bool>,
    docker_network_mode: Option<String>,
    mounts: Option<Vec<String>>,
    environment_variables: Option<Vec<String>>,
    aws_config_source_dir: Option<String>,
    aws_config_destination_dir: Option<String>,
    worker_dir: Option<String>,
    experience_cache_dir: Option<String>,
    agent_error_sleep: Option<u64>,
    worker_exit_sleep: Option<u64>,
    container_watch_interval: Option<u64>,
    max_error_count: Option<u32>,
    one_task: Option<bool>,
    remove_worker_dir: Option<bool>,
    remove_experience_cache: Option<bool>,
    auto_update: Option<bool>,
    log_level: Option<String>,
    log_max_filesize: Option<u64>,
}

type EnvFn<'a> = &'a dyn Fn(&str) -> Option<String>;

impl AgentConfig {
    /// Load configuration from the given directory (or `~/resim` when absent),
    /// applying environment overrides on top of the file.
    pub fn load(config_dir_override: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| {
            std::env::var(env_var_name(key))
                .ok()
                .filter(|v| !v.is_empty())
        };
        let home = dirs::home_dir();
        let aws_dir = default_aws_config_dir(home.as_deref());
        Self::load_with(config_dir_override, &env, home, aws_dir)
    }

    fn load_with(
        config_dir_override: Option<&Path>,
        env: EnvFn,
        home: Option<PathBuf>,
        detected_aws_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config_dir = match config_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => home.clone().ok_or(ConfigError::NoHomeDir)?.join("resim"),
        };
        ensure_config_dir(&config_dir)?;

        let path = config_dir.join(CONFIG_FILENAME);
        let raw: RawConfig = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            serde_yaml::from_str(&text)?
        } else {
            RawConfig::default()
        };

        Self::resolve(raw, config_dir, env, home, detected_aws_dir)
    }

    fn resolve(
        raw: RawConfig,
        config_dir: PathBuf,
        env: EnvFn,
        home: Option<PathBuf>,
        detected_aws_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let api_host =
            string_value(env, "api-host", raw.api_host).unwrap_or_else(|| API_HOST_DEFAULT.into());
        let auth_host = string_value(env, "auth-host", raw.auth_host)
            .unwrap_or_else(|| AUTH_HOST_DEFAULT.into())
            .trim_end_matches('/')
            .to_string();

        // The dev tenant uses its own Auth0 application.
        let default_client_id = if auth_host == AUTH_HOST_DEFAULT {
            PROD_CLIENT_ID
        } else {
            DEV_CLIENT_ID
        };
        let client_id = string_value(env, "client-id", raw.client_id)
            .unwrap_or_else(|| default_client_id.into());

        let name = string_value(env, "name", raw.name).ok_or(ConfigError::MissingKey("name"))?;
        let pool_labels = list_value(env, "pool-labels", raw.pool_labels)
            .filter(|labels| !labels.is_empty())
            .ok_or(ConfigError::MissingKey("pool-labels"))?;

        let network_mode = match string_value(env, "docker-network-mode", raw.docker_network_mode) {
            Some(mode) => mode.parse()?,
            None => NetworkMode::default(),
        };

        let mut mounts = Vec::new();
        for entry in list_value(env, "mounts", raw.mounts).unwrap_or_default() {
            mounts.push(parse_mount(&entry)?);
        }

        let mut env_vars = Vec::new();
        for entry in
            list_value(env, "environment-variables", raw.environment_variables).unwrap_or_default()
        {
            env_vars.push(parse_env_var(&entry)?);
        }

        let host_aws_config_exists = detected_aws_dir.is_some();
        let aws_destination =
            string_value(env, "aws-config-destination-dir", raw.aws_config_destination_dir)
                .filter(|d| !d.is_empty());
        if let (Some(destination), true) = (&aws_destination, host_aws_config_exists) {
            let source = string_value(env, "aws-config-source-dir", raw.aws_config_source_dir)
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    detected_aws_dir
                        .as_ref()
                        .map(|d| d.to_string_lossy().into_owned())
                });
            if let Some(source) = source {
                mounts.push(Mount {
                    source,
                    target: destination.clone(),
                });
            }
        }

        let worker_dir = PathBuf::from(
            string_value(env, "worker-dir", raw.worker_dir)
                .unwrap_or_else(|| WORKER_DIR_DEFAULT.into()),
        );
        let experience_cache_dir =
            match string_value(env, "experience-cache-dir", raw.experience_cache_dir) {
                Some(dir) => PathBuf::from(dir),
                None => worker_dir.join("cache"),
            };

        let host_docker_config_dir = home
            .map(|h| h.join(".docker"))
            .unwrap_or_else(|| PathBuf::from("/root/.docker"));

        Ok(AgentConfig {
            api_host,
            auth_host,
            client_id,
            name,
            pool_labels,
            username: string_value(env, "username", raw.username).unwrap_or_default(),
            password: string_value(env, "password", raw.password).unwrap_or_default(),
            privileged: bool_value(env, "privileged", raw.privileged).unwrap_or(false),
            network_mode,
            custom_worker_config: CustomWorkerConfig {
                mounts,
                env_vars,
                cache_dir: CONTAINER_CACHE_DIR.to_string(),
            },
            host_docker_config_dir,
            host_aws_config_dir: detected_aws_dir,
            host_aws_config_exists,
            worker_dir,
            experience_cache_dir,
            agent_error_sleep: Duration::from_secs(
                u64_value(env, "agent-error-sleep", raw.agent_error_sleep)
                    .unwrap_or(AGENT_ERROR_SLEEP_DEFAULT_SECS),
            ),
            worker_exit_sleep: Duration::from_secs(
                u64_value(env, "worker-exit-sleep", raw.worker_exit_sleep)
                    .unwrap_or(WORKER_EXIT_SLEEP_DEFAULT_SECS),
            ),
            container_watch_interval: Duration::from_secs(
                u64_value(env, "container-watch-interval", raw.container_watch_interval)
                    .unwrap_or(CONTAINER_WATCH_INTERVAL_DEFAULT_SECS),
            ),
            max_error_count: u64_value(env, "max-error-count", raw.max_error_count.map(u64::from))
                .unwrap_or(u64::from(MAX_ERROR_COUNT_DEFAULT)) as u32,
            one_task: bool_value(env, "one-task", raw.one_task).unwrap_or(false),
            remove_worker_dir: bool_value(env, "remove-worker-dir", raw.remove_worker_dir)
                .unwrap_or(false),
            remove_experience_cache: bool_value(
                env,
                "remove-experience-cache",
                raw.remove_experience_cache,
            )
            .unwrap_or(false),
            auto_update: bool_value(env, "auto-update", raw.auto_update).unwrap_or(false),
            log_level: string_value(env, "log-level", raw.log_level)
                .unwrap_or_else(|| "info".into()),
            log_max_filesize_mb: u64_value(env, "log-max-filesize", raw.log_max_filesize)
                .unwrap_or(LOG_MAX_FILESIZE_DEFAULT_MB),
            config_dir,
        })
    }

    /// Path of the credential cache file.
    pub fn credential_cache_path(&self) -> PathBuf {
        self.config_dir.join(CREDENTIAL_CACHE_FILENAME)
    }
}

/// Split a `source:target` mount entry on the first colon. Both sides are
/// required.
pub fn parse_mount(entry: &str) -> Result<Mount, ConfigError> {
    match entry.split_once(':') {
        Some((source, target)) if !source.is_empty() && !target.is_empty() => Ok(Mount {
            source: source.to_string(),
            target: target.to_string(),
        }),
        _ => Err(ConfigError::InvalidMount(entry.to_string())),
    }
}

/// Split a `KEY=value` entry on the first equals sign. Both sides are
/// required.
pub fn parse_env_var(entry: &str) -> Result<EnvVar, ConfigError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => Ok(EnvVar {
            key: key.to_string(),
            value: value.to_string(),
        }),
        _ => Err(ConfigError::InvalidEnvVar(entry.to_string())),
    }
}

fn env_var_name(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.replace('-', "_").to_uppercase())
}

fn ensure_config_dir(dir: &Path) -> Result<(), ConfigError> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(dir, perms).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn default_aws_config_dir(home: Option<&Path>) -> Option<PathBuf> {
    let dir = home?.join(".aws");
    dir.exists().then_some(dir)
}

fn string_value(env: EnvFn, key: &str, file: Option<String>) -> Option<String> {
    env(key).or(file)
}

fn bool_value(env: EnvFn, key: &str, file: Option<bool>) -> Option<bool> {
    if let Some(v) = env(key) {
        return Some(matches!(v.as_str(), "true" | "1" | "yes"));
    }
    file
}

fn u64_value(env: EnvFn, key: &str, file: Option<u64>) -> Option<u64> {
    env(key).and_then(|v| v.parse().ok()).or(file)
}

fn list_value(env: EnvFn, key: &str, file: Option<Vec<String>>) -> Option<Vec<String>> {
    if let Some(v) = env(key) {
        return Some(
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    }
    file
}
