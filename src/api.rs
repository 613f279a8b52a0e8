// Typed endpoint wrappers
// Thin calls into the Anima backend, routed through the token manager, the
// authenticated fetch wrapper, and the duplicate-save guard.

use anyhow::{Context, Result};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

use crate::auth::TokenManager;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dedup::SaveGuard;
use crate::error::ApiError;
use crate::http_client::AnimaHttpClient;
use crate::models::{
    AnalysisResult, ErrorBody, HistoryResponse, LoginRequest, LoginResponse, RegisterRequest,
    SaveOutcome, UserStats,
};
use crate::storage::{FileTokenStore, TokenStore};

const SESSION_ID_KEY: &str = "session_id";
const USER_NAME_KEY: &str = "user_name";

/// High-level client for the Anima emotion-analysis API.
pub struct AnimaClient {
    store: Arc<dyn TokenStore>,
    tokens: TokenManager,
    http: AnimaHttpClient,
    guard: SaveGuard,
}

impl AnimaClient {
    /// Build a client with the file-backed token store from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let store = FileTokenStore::open(&config.token_file)
            .with_context(|| format!("failed to open token store at {}", config.token_file.display()))?;
        Self::with_parts(config, Arc::new(store), Arc::new(SystemClock))
    }

    /// Build a client from environment configuration.
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    /// Build a client with explicit storage and clock. Tests and embedders
    /// use this to control persistence and time.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let tokens = TokenManager::with_clock(&config, store.clone(), clock.clone())?;
        let http = AnimaHttpClient::new(&config, tokens.clone())?;
        let guard = SaveGuard::with_clock(clock);

        Ok(Self {
            store,
            tokens,
            http,
            guard,
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn http(&self) -> &AnimaHttpClient {
        &self.http
    }

    pub fn save_guard(&self) -> &SaveGuard {
        &self.guard
    }

    /// Sign in and store the issued tokens and session metadata.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let request = self
            .http
            .request(Method::POST, "/v1/auth/login")
            .json(credentials)
            .build()
            .map_err(ApiError::from_reqwest)?;

        let response = self.http.fetch(request, false).await?;
        let data: LoginResponse = parse_json(response).await?;

        if let Some(ref access_token) = data.access_token {
            self.tokens.set_access_token(access_token, data.expires_in);
        }
        if let Some(ref refresh_token) = data.refresh_token {
            self.tokens.set_refresh_token(refresh_token);
        }
        if let Some(session_id) = data.session_id {
            self.write_app_key(SESSION_ID_KEY, &session_id.to_string());
        }
        if let Some(ref user_name) = data.user_name {
            self.write_app_key(USER_NAME_KEY, user_name);
        }

        tracing::info!("signed in");
        Ok(data)
    }

    /// Create an account. No tokens are issued until the user signs in.
    pub async fn register(&self, payload: &RegisterRequest) -> Result<serde_json::Value, ApiError> {
        let request = self
            .http
            .request(Method::POST, "/v1/auth/register")
            .json(payload)
            .build()
            .map_err(ApiError::from_reqwest)?;

        let response = self.http.fetch(request, false).await?;
        parse_json(response).await
    }

    /// Sign out. The server call is best-effort; local credentials are
    /// cleared regardless of its outcome.
    pub async fn logout(&self) {
        if let Ok(Some(session_id)) = self.store.get(SESSION_ID_KEY) {
            let result = async {
                let request = self
                    .http
                    .request(Method::POST, "/v1/auth/logout")
                    .json(&json!({ "session_id": session_id.parse::<i64>().ok() }))
                    .build()
                    .map_err(ApiError::from_reqwest)?;
                self.http.authenticated_fetch(request).await
            }
            .await;

            if let Err(e) = result {
                tracing::warn!(error = %e, "logout call failed, clearing local session anyway");
            }
        }

        self.tokens.clear_all_tokens();
        for key in [SESSION_ID_KEY, USER_NAME_KEY] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, error = %e, "failed to remove session key");
            }
        }
        tracing::info!("signed out");
    }

    /// Fetch the signed-in user's profile.
    pub async fn current_user(&self) -> Result<serde_json::Value, ApiError> {
        let request = self
            .http
            .request(Method::GET, "/v1/auth/me")
            .build()
            .map_err(ApiError::from_reqwest)?;
        let response = self.http.authenticated_fetch(request).await?;
        parse_json(response).await
    }

    /// Classify the emotion in a base64-encoded photo.
    pub async fn analyze_base64(&self, image_base64: &str) -> Result<AnalysisResult, ApiError> {
        let request = self
            .http
            .request(Method::POST, "/v1/analysis/analyze-base64")
            .json(&json!({ "image": image_base64 }))
            .build()
            .map_err(ApiError::from_reqwest)?;
        let response = self.http.authenticated_fetch(request).await?;
        parse_json(response).await
    }

    /// Persist an analysis result, suppressing near-duplicate submissions.
    pub async fn save_analysis(&self, result: AnalysisResult) -> Result<SaveOutcome, ApiError> {
        self.guard
            .save_analysis_safe(result, |data| async move {
                let request = self
                    .http
                    .request(Method::POST, "/v1/analytics/save-analysis")
                    .json(&data)
                    .build()
                    .map_err(ApiError::from_reqwest)?;
                let response = self.http.authenticated_fetch(request).await?;
                parse_json(response).await
            })
            .await
    }

    /// Dashboard statistics for the signed-in user.
    pub async fn user_stats(&self) -> Result<UserStats, ApiError> {
        let request = self
            .http
            .request(Method::GET, "/v1/analytics/stats")
            .build()
            .map_err(ApiError::from_reqwest)?;
        let response = self.http.authenticated_fetch(request).await?;
        parse_json(response).await
    }

    /// Saved analysis history, optionally filtered to one emotion.
    pub async fn history(&self, emotion_filter: Option<&str>) -> Result<HistoryResponse, ApiError> {
        let mut builder = self.http.request(Method::GET, "/v1/analytics/history");
        if let Some(emotion) = emotion_filter.filter(|f| *f != "all") {
            builder = builder.query(&[("emotion_filter", emotion)]);
        }
        let request = builder.build().map_err(ApiError::from_reqwest)?;
        let response = self.http.authenticated_fetch(request).await?;
        parse_json(response).await
    }

    fn write_app_key(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!(key, error = %e, "failed to store session key");
        }
    }
}

/// Decode a JSON response, surfacing non-2xx statuses as [`ApiError::Api`]
/// with the backend's `detail` message when one is present.
async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.detail)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        return Err(ApiError::Api {
            status: status.as_u16(),
            message,
        });
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::InvalidResponse(e.to_string()))
}
