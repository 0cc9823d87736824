//! Typed HTTP client for the control plane.
//!
//! Every request carries the agent identity headers and a bearer token
//! fetched fresh from the [`TokenManager`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use crate::api::types::{CheckinInput, CheckinOutput, HeartbeatInput, TaskStatus, UpdateTaskInput};
use crate::auth::{AuthError, TokenManager};

pub const AGENT_ID_HEADER: &str = "X-ReSim-AgentID";
pub const AGENT_VERSION_HEADER: &str = "X-ReSim-AgentVersion";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("auth: {0}")]
    Auth(#[from] AuthError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
    },
}

pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    agent_name: String,
    agent_version: String,
    pool_labels: Vec<String>,
    tokens: Arc<TokenManager>,
}

impl ControlPlaneClient {
    pub fn new(
        api_host: &str,
        agent_name: &str,
        agent_version: &str,
        pool_labels: Vec<String>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        let mut base_url = api_host.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http,
            base_url,
            agent_name: agent_name.to_string(),
            agent_version: agent_version.to_string(),
            pool_labels,
            tokens,
        }
    }

    /// Ask the control plane for a work assignment. A 204 means none is
    /// available and yields an empty [`CheckinOutput`].
    pub async fn checkin(&self) -> Result<CheckinOutput, ApiError> {
        let body = CheckinInput {
            agent_id: self.agent_name.clone(),
            agent_version: self.agent_version.clone(),
            pool_labels: self.pool_labels.clone(),
        };

        let response = self.post("agent/checkin", &body).await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(CheckinOutput::default()),
            status if status.is_success() => Ok(response.json().await?),
            status => Err(ApiError::Status {
                endpoint: "checkin",
                status,
            }),
        }
    }

    /// Report liveness. Callers log failures; they never fault the run loop.
    pub async fn heartbeat(
        &self,
        task_name: Option<String>,
        task_status: Option<TaskStatus>,
    ) -> Result<(), ApiError> {
        let body = HeartbeatInput {
            agent_name: Some(self.agent_name.clone()),
            pool_labels: Some(self.pool_labels.clone()),
            task_name,
            task_status,
        };

        let response = self.post("agent/heartbeat", &body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: "heartbeat",
                status,
            });
        }
        Ok(())
    }

    /// Report a task's status on its behalf. The current worker reports its
    /// own task status, so the run loop never calls this.
    pub async fn update_task(
        &self,
        task_name: &str,
        status: TaskStatus,
        error_type: Option<String>,
    ) -> Result<(), ApiError> {
        let body = UpdateTaskInput {
            status: Some(status),
            error_type,
            output: None,
        };

        let response = self
            .post(&format!("task/{task_name}/update"), &body)
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: "update task",
                status,
            });
        }
        Ok(())
    }

    async fn post<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let token = self.tokens.get_token().await?;
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token.access_token)
            .header(AGENT_ID_HEADER, &self.agent_name)
            .header(AGENT_VERSION_HEADER, &self.agent_version)
            .json(body)
            .send()
            .await?;
        Ok(response)
    }
}
