//! Agent-level errors.
//!
//! Iteration failures carry the attempt number (the consecutive-failure count
//! at the time of the failure) so the terminal error reports how many tries
//! were burned.

use std::path::PathBuf;

use crate::api::ApiError;
use crate::auth::{AuthError, IdentityError};
use crate::docker::DriverError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize worker config: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("error checking in (attempt {attempt}): {source}")]
    Checkin { attempt: u32, source: ApiError },

    #[error("no worker image URI (attempt {attempt})")]
    NoWorkerImage { attempt: u32 },

    #[error("no worker environment variables (attempt {attempt})")]
    NoWorkerEnvironment { attempt: u32 },

    #[error("no auth token (attempt {attempt})")]
    NoAuthToken { attempt: u32 },

    #[error("error pulling worker image (attempt {attempt}): {source}")]
    Pull { attempt: u32, source: DriverError },

    #[error("error running ReSim worker (attempt {attempt}): {source}")]
    Worker { attempt: u32, source: DriverError },

    #[error("error budget exhausted after {count} consecutive failures")]
    ErrorBudgetExhausted { count: u32 },
}
