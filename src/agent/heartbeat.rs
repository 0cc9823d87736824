//! Periodic heartbeat task.
//!
//! Each tick posts a beat with the agent identity, then re-runs check-in so
//! the shared image URI stays fresh between loop iterations. The ticker never
//! faults the run loop: every failure is logged and swallowed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::agent::run_loop::AgentStatus;
use crate::api::{ControlPlaneClient, TaskStatus};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub struct HeartbeatTicker {
    client: Arc<ControlPlaneClient>,
    image: Arc<RwLock<Option<String>>>,
    status: Arc<RwLock<AgentStatus>>,
    interval: Duration,
}

impl HeartbeatTicker {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        image: Arc<RwLock<Option<String>>>,
        status: Arc<RwLock<AgentStatus>>,
    ) -> Self {
        Self {
            client,
            image,
            status,
            interval: HEARTBEAT_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the ticker as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            // Don't beat immediately on startup
            interval.tick().await;
            loop {
                interval.tick().await;
                self.beat().await;
            }
        })
    }

    async fn beat(&self) {
        let status = *self.status.read().await;
        let task_status = (status == AgentStatus::Running).then_some(TaskStatus::Running);

        if let Err(err) = self.client.heartbeat(None, task_status).await {
            tracing::warn!(error = %err, "heartbeat failed");
        }

        match self.client.checkin().await {
            Ok(out) => {
                if let Some(uri) = out.worker_image_uri {
                    *self.image.write().await = Some(uri);
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "heartbeat check-in failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Token, TokenManager};
    use chrono::{Duration as ChronoDuration, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seeded_client(dir: &std::path::Path, server_uri: &str) -> Arc<ControlPlaneClient> {
        let cache_path = dir.join("cache.json");
        let token = Token {
            access_token: "test-token".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: String::new(),
            expiry: Utc::now() + ChronoDuration::hours(1),
        };
        std::fs::write(&cache_path, serde_json::to_vec(&token).unwrap()).unwrap();
        let tokens = Arc::new(TokenManager::new(
            "http://127.0.0.1:1",
            "client-id",
            "",
            "",
            cache_path,
        ));
        Arc::new(ControlPlaneClient::new(
            server_uri,
            "fred",
            "0.3.2",
            vec!["small".to_string()],
            tokens,
        ))
    }

    fn ticker(
        client: Arc<ControlPlaneClient>,
    ) -> (HeartbeatTicker, Arc<RwLock<Option<String>>>) {
        let image = Arc::new(RwLock::new(None));
        let status = Arc::new(RwLock::new(AgentStatus::Idle));
        let ticker = HeartbeatTicker::new(client, image.clone(), status);
        (ticker, image)
    }

    #[tokio::test]
    async fn test_beat_refreshes_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/checkin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workerImageURI": "img:B",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (ticker, image) = ticker(seeded_client(dir.path(), &server.uri()));
        ticker.beat().await;

        assert_eq!(image.read().await.as_deref(), Some("img:B"));
    }

    #[tokio::test]
    async fn test_beat_swallows_heartbeat_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/checkin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workerImageURI": "img:C",
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (ticker, image) = ticker(seeded_client(dir.path(), &server.uri()));
        // must not panic or propagate
        ticker.beat().await;
        assert_eq!(image.read().await.as_deref(), Some("img:C"));
    }

    #[tokio::test]
    async fn test_beat_keeps_image_on_empty_checkin() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/checkin"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (ticker, image) = ticker(seeded_client(dir.path(), &server.uri()));
        *image.write().await = Some("img:A".to_string());
        ticker.beat().await;
        // a 204 does not clear the last announced image
        assert_eq!(image.read().await.as_deref(), Some("img:A"));
    }

    #[tokio::test]
    async fn test_spawned_ticker_beats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/heartbeat"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/agent/checkin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workerImageURI": "img:D",
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (ticker, image) = ticker(seeded_client(dir.path(), &server.uri()));
        let handle = ticker.with_interval(Duration::from_millis(10)).spawn();

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if image.read().await.is_some() {
                break;
            }
        }
        handle.abort();
        assert_eq!(image.read().await.as_deref(), Some("img:D"));
    }
}
