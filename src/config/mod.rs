//! Configuration loading and logging setup.

pub mod logging;
mod settings;

pub use settings::{
    AgentConfig, ConfigError, CustomWorkerConfig, EnvVar, Mount, NetworkMode, parse_env_var,
    parse_mount, API_HOST_DEFAULT, AUTH_HOST_DEFAULT, CONFIG_FILENAME, CONTAINER_CACHE_DIR,
    CREDENTIAL_CACHE_FILENAME, WORKER_DIR_DEFAULT,
};
