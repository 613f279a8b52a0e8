// Authenticated request dispatch
// Attaches bearer credentials, enforces a per-request timeout, and retries
// once after a forced refresh when the server answers 401.

use anyhow::{Context, Result};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::auth::TokenManager;
use crate::config::Config;
use crate::error::ApiError;

/// Default number of refresh-and-retry attempts after a 401.
const DEFAULT_AUTH_RETRIES: u32 = 1;

/// HTTP client for the Anima API.
pub struct AnimaHttpClient {
    /// Shared client with connection pooling
    client: Client,

    tokens: TokenManager,
    base_url: String,
    request_timeout: Duration,
}

impl AnimaHttpClient {
    pub fn new(config: &Config, tokens: TokenManager) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            tokens,
            base_url: config.base_url.clone(),
            request_timeout: config.request_timeout,
        })
    }

    /// Build a request against the configured backend.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// Issue a request with no credential handling, aborting after `timeout`.
    ///
    /// A timeout is reported as [`ApiError::RequestTimeout`], distinct from
    /// connectivity failures ([`ApiError::Network`]). The abort cancels only
    /// this call; any token refresh it raced with runs to completion.
    pub async fn fetch_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, ApiError> {
        match tokio::time::timeout(timeout, self.client.execute(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ApiError::from_reqwest(e)),
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(ApiError::RequestTimeout)
            }
        }
    }

    /// Dispatch a request, with or without credential handling.
    ///
    /// With `requires_auth` false this is just the timeout-wrapped call.
    pub async fn fetch(&self, request: Request, requires_auth: bool) -> Result<Response, ApiError> {
        if requires_auth {
            self.authenticated_fetch(request).await
        } else {
            self.fetch_with_timeout(request, self.request_timeout).await
        }
    }

    /// Issue a request with a valid bearer token attached, retrying once
    /// after a forced refresh if the server answers 401.
    pub async fn authenticated_fetch(&self, request: Request) -> Result<Response, ApiError> {
        self.authenticated_fetch_with(request, DEFAULT_AUTH_RETRIES, self.request_timeout)
            .await
    }

    /// [`Self::authenticated_fetch`] with explicit retry and timeout budgets.
    ///
    /// `NoToken` propagates untouched so the caller can route to sign-in.
    /// A 401 that cannot be resolved by refreshing (refresh fails, or the
    /// retried call is rejected again) clears all credentials and fails
    /// with [`ApiError::SessionExpired`].
    pub async fn authenticated_fetch_with(
        &self,
        request: Request,
        retries: u32,
        timeout: Duration,
    ) -> Result<Response, ApiError> {
        let mut retries_left = retries;
        let mut token = self.tokens.get_valid_access_token().await?;

        loop {
            let mut attempt = request.try_clone().ok_or_else(|| {
                ApiError::Internal("request body is not cloneable".to_string())
            })?;
            attempt
                .headers_mut()
                .insert(AUTHORIZATION, bearer_header(&token)?);

            tracing::debug!(
                method = %attempt.method(),
                url = %attempt.url(),
                retries_left,
                "dispatching authenticated request"
            );
            let response = self.fetch_with_timeout(attempt, timeout).await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if retries_left == 0 {
                // The token we just minted was rejected too; the session is gone
                tracing::error!("request rejected again after refresh, session expired");
                self.tokens.clear_all_tokens();
                return Err(ApiError::SessionExpired);
            }

            // The token may have expired between the validity check and the
            // request landing; force a refresh, bypassing the expiry check
            tracing::warn!("received 401, forcing token refresh and retrying");
            match self.tokens.refresh_access_token().await {
                Ok(fresh) => {
                    token = fresh;
                    retries_left -= 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "forced refresh after 401 failed");
                    self.tokens.clear_all_tokens();
                    return Err(ApiError::SessionExpired);
                }
            }
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ApiError::Internal("access token is not a valid header value".to_string()))
}
