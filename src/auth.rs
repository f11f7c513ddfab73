use crate::error::FetchError;
use log::{debug, info, warn};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_AUTH_URL: &str =
    "https://tdx.transportdata.tw/auth/realms/TDXConnect/protocol/openid-connect/token";

const INITIAL_AUTH_ATTEMPTS: u32 = 3;
const INITIAL_AUTH_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Live authentication context shared by all concurrent fetch tasks.
///
/// The token is refreshed reactively: expiry is noticed when a data request
/// comes back with an auth-flavored status, at which point the affected task
/// calls [`Session::reauthenticate`]. Refreshes are serialized behind the
/// token lock so that several tasks hitting expiry at once cost a single
/// token-endpoint call.
#[derive(Debug)]
pub struct Session {
    http: HttpClient,
    auth_url: String,
    app_id: String,
    app_key: String,
    token: Mutex<Option<String>>,
}

impl Session {
    pub fn new(
        http: HttpClient,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            token: Mutex::new(None),
        }
    }

    /// Override the token endpoint (useful for tests or proxies).
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    /// Request an access token with the client-credentials grant and store it.
    pub async fn authenticate(&self) -> Result<(), FetchError> {
        let mut guard = self.token.lock().await;
        let token = self.request_token().await?;
        *guard = Some(token);
        info!("Authenticated against {}", self.auth_url);
        Ok(())
    }

    /// Authenticate with a bounded number of attempts. Used once at startup;
    /// without any session no date can proceed, so exhaustion is fatal.
    pub async fn authenticate_with_retries(&self) -> Result<(), FetchError> {
        let mut last_err = None;
        for attempt in 1..=INITIAL_AUTH_ATTEMPTS {
            match self.authenticate().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(
                        "Initial authentication attempt {}/{} failed: {}",
                        attempt, INITIAL_AUTH_ATTEMPTS, e
                    );
                    last_err = Some(e);
                    if attempt < INITIAL_AUTH_ATTEMPTS {
                        tokio::time::sleep(INITIAL_AUTH_BACKOFF * attempt).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(FetchError::NoSession))
    }

    /// Current bearer token, or `NoSession` if authentication never succeeded.
    pub async fn bearer_token(&self) -> Result<String, FetchError> {
        self.token
            .lock()
            .await
            .clone()
            .ok_or(FetchError::NoSession)
    }

    /// Single-flight token refresh after a request was rejected.
    ///
    /// `stale` is the token the failed request carried. If the stored token
    /// already differs, a sibling task refreshed first and its result is
    /// reused without another token-endpoint call.
    pub async fn reauthenticate(&self, stale: &str) -> Result<String, FetchError> {
        let mut guard = self.token.lock().await;
        if let Some(current) = guard.as_ref()
            && current != stale
        {
            debug!("Token already refreshed by a sibling task");
            return Ok(current.clone());
        }
        let token = self.request_token().await?;
        *guard = Some(token.clone());
        info!("Re-authenticated after token rejection");
        Ok(token)
    }

    async fn request_token(&self) -> Result<String, FetchError> {
        debug!("POST {}", self.auth_url);
        let response = self
            .http
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Auth(format!(
                "token endpoint returned status {status}"
            )));
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Auth(format!("unparsable token response: {e}")))?;
        Ok(parsed.access_token)
    }
}
