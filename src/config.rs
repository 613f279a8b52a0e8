// Client configuration
// Loaded from environment variables with documented local defaults.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Fallback backend address for local development.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default per-request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the Anima backend, without a trailing slash
    pub base_url: String,

    /// Budget for a single outbound request, including the response
    pub request_timeout: Duration,

    /// Where the file-backed token store lives
    pub token_file: PathBuf,
}

impl Config {
    /// Build a configuration for the given backend with default timeouts
    /// and token-file location.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            token_file: default_token_file(),
        }
    }

    /// Load configuration from the environment (and a `.env` file if one
    /// exists).
    ///
    /// - `ANIMA_API_URL` — backend base URL, defaults to [`DEFAULT_BASE_URL`]
    /// - `ANIMA_REQUEST_TIMEOUT` — per-request timeout in seconds
    /// - `ANIMA_TOKEN_FILE` — path of the token store
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let base_url =
            std::env::var("ANIMA_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let mut config = Config::new(base_url);

        if let Ok(raw) = std::env::var("ANIMA_REQUEST_TIMEOUT") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid ANIMA_REQUEST_TIMEOUT: {raw:?}"))?;
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Ok(path) = std::env::var("ANIMA_TOKEN_FILE") {
            config.token_file = PathBuf::from(path);
        }

        tracing::debug!(
            base_url = %config.base_url,
            timeout_secs = config.request_timeout.as_secs(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = path.into();
        self
    }
}

fn default_token_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anima")
        .join("tokens.json")
}
