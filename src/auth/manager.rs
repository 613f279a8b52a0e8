// Token lifecycle manager
// Single source of truth for the credential record. Guarantees callers never
// get an expired access token without an attempted refresh, and coalesces
// concurrent refreshes into one upstream call.

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::types::{RefreshRequest, RefreshResponse};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::ApiError;
use crate::storage::TokenStore;

/// Refresh the access token this long before its recorded expiry.
pub const REFRESH_BUFFER_MS: i64 = 5 * 60 * 1000;

/// Assumed lifetime when the server omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

pub(crate) const ACCESS_TOKEN_KEY: &str = "access_token";
pub(crate) const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub(crate) const SPOTIFY_TOKEN_KEY: &str = "spotify_jwt";
pub(crate) const TOKEN_EXPIRY_KEY: &str = "token_expiry";

type SharedRefresh = Shared<BoxFuture<'static, Result<String, ApiError>>>;

/// Manages the stored access token, refresh token, and the independently
/// issued Spotify integration token.
///
/// Cheap to clone; clones share the same credential record and refresh lock.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,

    /// HTTP client used only for refresh calls; independent of any
    /// request-level timeout the caller may be under
    http: Client,
    base_url: String,

    /// Single-flight slot: the currently running refresh, if any.
    /// Concurrent callers clone the shared future instead of issuing a
    /// second upstream call.
    refresh_in_flight: Mutex<Option<SharedRefresh>>,
}

impl TokenManager {
    pub fn new(config: &Config, store: Arc<dyn TokenStore>) -> Result<Self> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    /// Construct with an explicit clock. Tests use this with
    /// [`crate::clock::ManualClock`] to drive expiry deterministically.
    pub fn with_clock(
        config: &Config,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client for token refresh")?;

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                clock,
                http,
                base_url: config.base_url.clone(),
                refresh_in_flight: Mutex::new(None),
            }),
        })
    }

    /// Store a new access token and compute its expiry timestamp.
    /// `expires_in` defaults to one hour when the server does not say.
    pub fn set_access_token(&self, token: &str, expires_in: Option<u64>) {
        let expires_in = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expiry_ms = self.inner.clock.now_ms() + expires_in as i64 * 1000;

        self.write_key(ACCESS_TOKEN_KEY, token);
        self.write_key(TOKEN_EXPIRY_KEY, &expiry_ms.to_string());
        tracing::debug!(expires_in, "access token stored");
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.write_key(REFRESH_TOKEN_KEY, token);
    }

    /// Store the Spotify integration token. Its lifecycle is independent of
    /// the refresh flow; no expiry is tracked client-side.
    pub fn set_spotify_token(&self, token: &str) {
        self.write_key(SPOTIFY_TOKEN_KEY, token);
    }

    pub fn get_access_token(&self) -> Option<String> {
        self.read_key(ACCESS_TOKEN_KEY)
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.read_key(REFRESH_TOKEN_KEY)
    }

    pub fn get_spotify_token(&self) -> Option<String> {
        self.read_key(SPOTIFY_TOKEN_KEY)
    }

    /// Whether the access token is expired or inside the refresh buffer.
    ///
    /// Fail-safe: a missing or unreadable expiry record counts as expired.
    pub fn is_token_expired(&self) -> bool {
        let raw = match self.inner.store.get(TOKEN_EXPIRY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!(error = %e, "could not read token expiry, treating as expired");
                return true;
            }
        };

        let expiry_ms: i64 = match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(%raw, "unparseable token expiry, treating as expired");
                return true;
            }
        };

        self.inner.clock.now_ms() >= expiry_ms - REFRESH_BUFFER_MS
    }

    pub fn is_authenticated(&self) -> bool {
        self.get_access_token().is_some() && !self.is_token_expired()
    }

    /// Return the current access token, refreshing first if it is expired
    /// or about to expire.
    ///
    /// Fails with [`ApiError::NoToken`] if no token was ever issued.
    pub async fn get_valid_access_token(&self) -> Result<String, ApiError> {
        let token = self.get_access_token().ok_or(ApiError::NoToken)?;

        if self.is_token_expired() {
            tracing::debug!("access token expired or expiring soon, refreshing");
            return self.refresh_access_token().await;
        }

        Ok(token)
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// If a refresh is already in flight, the caller awaits that one instead
    /// of issuing a second upstream call. On a 401 the whole credential
    /// record is cleared and [`ApiError::RefreshTokenExpired`] is returned;
    /// any other failure leaves stored credentials untouched.
    pub async fn refresh_access_token(&self) -> Result<String, ApiError> {
        let fut = {
            let mut slot = self.inner.refresh_in_flight.lock().await;
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!("refresh already in flight, awaiting shared result");
                    existing.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let fresh: SharedRefresh =
                        async move { Inner::perform_refresh(inner).await }.boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };

        let result = fut.clone().await;

        // Release the single-flight slot on every exit path. Only clear it
        // if it still holds our future: a later caller may already have
        // installed a new one.
        let mut slot = self.inner.refresh_in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&fut)) {
            *slot = None;
        }
        drop(slot);

        result
    }

    /// Remove the access, refresh, and Spotify tokens plus the expiry
    /// record. Idempotent; never fails observably.
    pub fn clear_all_tokens(&self) {
        self.inner.clear_all();
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.inner.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                // Degrade to absent rather than failing the caller
                tracing::warn!(key, error = %e, "token store read failed, treating as absent");
                None
            }
        }
    }

    fn write_key(&self, key: &str, value: &str) {
        self.inner.write_best_effort(key, value);
    }
}

impl Inner {
    async fn perform_refresh(inner: Arc<Inner>) -> Result<String, ApiError> {
        let refresh_token = match inner.store.get(REFRESH_TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => return Err(ApiError::NoRefreshToken),
            Err(e) => {
                tracing::warn!(error = %e, "could not read refresh token");
                return Err(ApiError::NoRefreshToken);
            }
        };

        let url = format!("{}/v1/auth/refresh", inner.base_url);
        tracing::debug!(%url, "refreshing access token");

        let response = inner
            .http
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!("refresh token rejected by server, clearing credentials");
            inner.clear_all();
            return Err(ApiError::RefreshTokenExpired);
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token refresh failed");
            return Err(ApiError::RefreshFailed(status.as_u16()));
        }

        let data: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        if data.access_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "refresh response contains no access token".to_string(),
            ));
        }

        let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expiry_ms = inner.clock.now_ms() + expires_in as i64 * 1000;
        inner.write_best_effort(ACCESS_TOKEN_KEY, &data.access_token);
        inner.write_best_effort(TOKEN_EXPIRY_KEY, &expiry_ms.to_string());
        if let Some(ref new_refresh_token) = data.refresh_token {
            inner.write_best_effort(REFRESH_TOKEN_KEY, new_refresh_token);
        }

        tracing::info!(expires_in, "access token refreshed");
        Ok(data.access_token)
    }

    fn clear_all(&self) {
        for key in [
            ACCESS_TOKEN_KEY,
            REFRESH_TOKEN_KEY,
            SPOTIFY_TOKEN_KEY,
            TOKEN_EXPIRY_KEY,
        ] {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key, error = %e, "failed to remove token");
            }
        }
        tracing::debug!("all tokens cleared");
    }

    fn write_best_effort(&self, key: &str, value: &str) {
        // The in-flight value is still handed to the caller; only
        // persistence across restarts is lost
        if let Err(e) = self.store.set(key, value) {
            tracing::warn!(key, error = %e, "token store write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryTokenStore;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn manager_with_clock(base_url: &str) -> (TokenManager, Arc<ManualClock>, Arc<MemoryTokenStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryTokenStore::new());
        let config = Config::new(base_url);
        let manager = TokenManager::with_clock(
            &config,
            store.clone() as Arc<dyn TokenStore>,
            clock.clone() as Arc<dyn Clock>,
        )
        .unwrap();
        (manager, clock, store)
    }

    #[tokio::test]
    async fn test_fresh_token_is_authenticated() {
        let (manager, _clock, _store) = manager_with_clock("http://localhost:8000");

        assert!(!manager.is_authenticated());
        manager.set_access_token("tok-1", Some(3600));

        assert!(!manager.is_token_expired());
        assert!(manager.is_authenticated());
        assert_eq!(manager.get_access_token().as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_expiry_flips_exactly_at_buffer_boundary() {
        let (manager, clock, _store) = manager_with_clock("http://localhost:8000");

        // Expiry at now + 3_600_000ms; the flip happens at expiry - 300_000ms
        manager.set_access_token("tok-1", Some(3600));

        clock.advance(Duration::milliseconds(3_299_999));
        assert!(!manager.is_token_expired());
        assert!(manager.is_authenticated());

        clock.advance(Duration::milliseconds(1));
        assert!(manager.is_token_expired());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_expiry_record_counts_as_expired() {
        let (manager, _clock, store) = manager_with_clock("http://localhost:8000");

        // A token written without expiry bookkeeping (e.g. by an older build)
        store.set(ACCESS_TOKEN_KEY, "orphan").unwrap();
        assert!(manager.is_token_expired());
        assert!(!manager.is_authenticated());

        // Garbage expiry behaves the same
        store.set(TOKEN_EXPIRY_KEY, "not-a-number").unwrap();
        assert!(manager.is_token_expired());
    }

    #[tokio::test]
    async fn test_clear_all_tokens_is_idempotent() {
        let (manager, _clock, store) = manager_with_clock("http://localhost:8000");

        manager.set_access_token("a", None);
        manager.set_refresh_token("r");
        manager.set_spotify_token("s");

        manager.clear_all_tokens();
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(SPOTIFY_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(TOKEN_EXPIRY_KEY).unwrap(), None);

        // Second clear is a no-op
        manager.clear_all_tokens();
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_get_valid_access_token_without_any_token() {
        let (manager, _clock, _store) = manager_with_clock("http://localhost:8000");
        let err = manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, ApiError::NoToken);
    }

    #[tokio::test]
    async fn test_get_valid_access_token_skips_refresh_when_fresh() {
        // No mock server: a network call here would error out
        let (manager, _clock, _store) = manager_with_clock("http://127.0.0.1:1");
        manager.set_access_token("still-good", Some(3600));

        let token = manager.get_valid_access_token().await.unwrap();
        assert_eq!(token, "still-good");
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let (manager, _clock, _store) = manager_with_clock("http://127.0.0.1:1");
        let err = manager.refresh_access_token().await.unwrap_err();
        assert_eq!(err, ApiError::NoRefreshToken);
    }

    #[tokio::test]
    async fn test_refresh_success_rotates_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({"refresh_token": "r-old"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "access_token": "tok-new",
                    "refresh_token": "r-new",
                    "expires_in": 1800
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let (manager, _clock, _store) = manager_with_clock(&server.url());
        manager.set_refresh_token("r-old");

        let token = manager.refresh_access_token().await.unwrap();
        assert_eq!(token, "tok-new");
        assert_eq!(manager.get_access_token().as_deref(), Some("tok-new"));
        assert_eq!(manager.get_refresh_token().as_deref(), Some("r-new"));
        assert!(manager.is_authenticated());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_401_clears_entire_credential_record() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/auth/refresh")
            .with_status(401)
            .create_async()
            .await;

        let (manager, _clock, store) = manager_with_clock(&server.url());
        manager.set_access_token("tok-old", Some(3600));
        manager.set_refresh_token("r-old");
        manager.set_spotify_token("spotify-old");

        let err = manager.refresh_access_token().await.unwrap_err();
        assert_eq!(err, ApiError::RefreshTokenExpired);

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(SPOTIFY_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(TOKEN_EXPIRY_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_transient_failure_preserves_credentials() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/auth/refresh")
            .with_status(503)
            .create_async()
            .await;

        let (manager, _clock, _store) = manager_with_clock(&server.url());
        manager.set_access_token("tok-old", Some(3600));
        manager.set_refresh_token("r-old");

        let err = manager.refresh_access_token().await.unwrap_err();
        assert_eq!(err, ApiError::RefreshFailed(503));

        // Transient failure: nothing was cleared, retry is possible
        assert_eq!(manager.get_refresh_token().as_deref(), Some("r-old"));
        assert_eq!(manager.get_access_token().as_deref(), Some("tok-old"));
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_issue_one_upstream_call() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/refresh")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "tok-shared", "expires_in": 3600}).to_string())
            .expect(1)
            .create_async()
            .await;

        let (manager, _clock, _store) = manager_with_clock(&server.url());
        manager.set_refresh_token("r-1");

        let results = futures::future::join_all(
            (0..5).map(|_| manager.refresh_access_token()),
        )
        .await;

        for result in results {
            assert_eq!(result.unwrap(), "tok-shared");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_lock_is_released_after_failure() {
        let mut server = mockito::Server::new_async().await;
        let fail = server
            .mock("POST", "/v1/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({"refresh_token": "r-1"})))
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/v1/auth/refresh")
            .match_body(mockito::Matcher::Json(json!({"refresh_token": "r-2"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"access_token": "tok-2"}).to_string())
            .expect(1)
            .create_async()
            .await;

        let (manager, _clock, _store) = manager_with_clock(&server.url());
        manager.set_refresh_token("r-1");

        let err = manager.refresh_access_token().await.unwrap_err();
        assert_eq!(err, ApiError::RefreshFailed(500));
        fail.assert_async().await;

        // A new refresh after the failure issues a fresh upstream call
        manager.set_refresh_token("r-2");
        let token = manager.refresh_access_token().await.unwrap();
        assert_eq!(token, "tok-2");
        ok.assert_async().await;
    }
}
