//! OAuth2 token lifecycle and the on-disk credential cache.
//!
//! [`TokenManager::get_token`] always returns a token that is valid at the
//! moment of return. Callers fetch a fresh token before every control-plane
//! request; the validity check makes that cheap. Acquisition order:
//!
//! 1. read the credential cache on first use (best effort)
//! 2. refresh grant when the current token is expired and a refresh token
//!    is held
//! 3. password-realm grant otherwise
//!
//! The cache file is rewritten (mode 0600) after any change and flushed again
//! on shutdown. Cache I/O failures are logged and swallowed; auth network
//! failures surface to the caller.

use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

pub const AUDIENCE: &str = "https://api.resim.ai";

const PASSWORD_REALM_GRANT: &str = "http://auth0.com/oauth/grant-type/password-realm";
const AGENTS_REALM: &str = "agents";
const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Tokens this close to expiry are treated as already expired.
const EXPIRY_SKEW_SECS: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned {0}")]
    Status(reqwest::StatusCode),

    #[error("token endpoint returned an invalid token")]
    InvalidToken,
}

/// An OAuth2 token as persisted in the credential cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

impl Token {
    /// A token is valid when it carries an access token and is not within
    /// [`EXPIRY_SKEW_SECS`] of expiry.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && Utc::now() < self.expiry - ChronoDuration::seconds(EXPIRY_SKEW_SECS)
    }
}

/// Wire shape of the token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    refresh_token: String,
    expires_in: i64,
}

enum Grant<'a> {
    Password,
    Refresh(&'a str),
}

impl Grant<'_> {
    fn mode(&self) -> &'static str {
        match self {
            Grant::Password => "password",
            Grant::Refresh(_) => "refresh",
        }
    }
}

/// Serializes token acquisition across the run loop and the heartbeat task.
pub struct TokenManager {
    http: reqwest::Client,
    auth_host: String,
    client_id: String,
    username: String,
    password: String,
    cache_path: PathBuf,
    current: Mutex<Option<Token>>,
}

impl TokenManager {
    pub fn new(
        auth_host: &str,
        client_id: &str,
        username: &str,
        password: &str,
        cache_path: PathBuf,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_host: auth_host.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            cache_path,
            current: Mutex::new(None),
        }
    }

    /// Return a token valid at the moment of return, refreshing or
    /// re-authenticating as needed. Concurrent callers are serialized.
    pub async fn get_token(&self) -> Result<Token, AuthError> {
        let mut current = self.current.lock().await;

        if current.is_none() {
            *current = self.read_cache();
        }

        if !current.as_ref().is_some_and(Token::is_valid) {
            let refresh_token = current
                .as_ref()
                .map(|t| t.refresh_token.clone())
                .filter(|r| !r.is_empty());

            let token = match refresh_token {
                Some(refresh) => match self.request_token(Grant::Refresh(&refresh)).await {
                    Ok(token) if token.is_valid() => token,
                    Ok(_) => self.request_token(Grant::Password).await?,
                    Err(err) => {
                        tracing::warn!(error = %err, "token refresh failed, falling back to password grant");
                        self.request_token(Grant::Password).await?
                    }
                },
                None => self.request_token(Grant::Password).await?,
            };

            *current = Some(token);
            self.write_cache(current.as_ref());
        }

        current
            .as_ref()
            .filter(|t| t.is_valid())
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }

    /// Persist the in-memory token. Called on shutdown.
    pub async fn flush(&self) {
        let current = self.current.lock().await;
        self.write_cache(current.as_ref());
    }

    async fn request_token(&self, grant: Grant<'_>) -> Result<Token, AuthError> {
        tracing::info!(mode = grant.mode(), "authenticating");

        let params: Vec<(&str, &str)> = match &grant {
            Grant::Password => vec![
                ("grant_type", PASSWORD_REALM_GRANT),
                ("realm", AGENTS_REALM),
                ("username", &self.username),
                ("password", &self.password),
                ("audience", AUDIENCE),
                ("client_id", &self.client_id),
                ("scope", OFFLINE_ACCESS_SCOPE),
            ],
            Grant::Refresh(refresh_token) => vec![
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("refresh_token", refresh_token),
            ],
        };

        let response = self
            .http
            .post(format!("{}/oauth/token", self.auth_host))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status));
        }

        let body: TokenResponse = response.json().await?;
        Ok(Token {
            access_token: body.access_token,
            token_type: body.token_type,
            refresh_token: body.refresh_token,
            expiry: Utc::now() + ChronoDuration::seconds(body.expires_in),
        })
    }

    fn read_cache(&self) -> Option<Token> {
        let data = std::fs::read(&self.cache_path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(token) => Some(token),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable credential cache");
                None
            }
        }
    }

    fn write_cache(&self, token: Option<&Token>) {
        let Some(token) = token else { return };
        tracing::debug!("saving credential cache");

        let data = match serde_json::to_vec(token) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "error serializing credential cache");
                return;
            }
        };

        if let Err(err) = write_private(&self.cache_path, &data) {
            tracing::warn!(error = %err, path = %self.cache_path.display(), "error saving credential cache");
        }
    }
}

fn write_private(path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write as _;

    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)
}
