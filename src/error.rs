// Error handling module
// Typed failure taxonomy for token lifecycle and request dispatch

use thiserror::Error;

/// Errors surfaced by the Anima client.
///
/// The enum is `Clone` so that callers coalesced behind a single in-flight
/// token refresh can all observe the same outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// No access token has ever been issued; the user must sign in
    #[error("not authenticated: no access token available")]
    NoToken,

    /// A refresh was attempted with no refresh token on hand
    #[error("no refresh token available")]
    NoRefreshToken,

    /// The server rejected the refresh token; credentials have been cleared
    #[error("refresh token expired or rejected by the server")]
    RefreshTokenExpired,

    /// Transient refresh failure; credentials are preserved and the caller
    /// may retry later
    #[error("token refresh failed with status {0}")]
    RefreshFailed(u16),

    /// The request did not complete within its timeout budget
    #[error("the request took too long to complete")]
    RequestTimeout,

    /// Connectivity failure: the request never produced a response
    #[error("network error: {0}")]
    Network(String),

    /// A forced refresh after a 401 failed; credentials have been cleared
    #[error("session expired, please sign in again")]
    SessionExpired,

    /// The server answered successfully but the body could not be decoded
    #[error("malformed response from server: {0}")]
    InvalidResponse(String),

    /// Business-level error response from the Anima API
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Internal client error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether this error means the session is gone and the user must be
    /// routed back to sign-in.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            ApiError::NoToken | ApiError::RefreshTokenExpired | ApiError::SessionExpired
        )
    }

    /// Short message suitable for direct display to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::RequestTimeout => "The request took too long. Please try again.",
            ApiError::Network(_) => "Could not reach the server. Check your connection.",
            ApiError::NoToken | ApiError::SessionExpired | ApiError::RefreshTokenExpired => {
                "Your session has expired. Please sign in again."
            }
            _ => "An unexpected error occurred. Please try again.",
        }
    }

    /// Map a transport-level reqwest failure into the client taxonomy.
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::RequestTimeout
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

/// Errors from the durable token store.
///
/// These are deliberately kept out of [`ApiError`]: read failures degrade to
/// "token absent" at the call site rather than failing the operation.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiError::RefreshFailed(503);
        assert_eq!(err.to_string(), "token refresh failed with status 503");

        let err = ApiError::Api {
            status: 422,
            message: "invalid payload".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 422 - invalid payload");
    }

    #[test]
    fn test_requires_reauth() {
        assert!(ApiError::NoToken.requires_reauth());
        assert!(ApiError::SessionExpired.requires_reauth());
        assert!(ApiError::RefreshTokenExpired.requires_reauth());
        assert!(!ApiError::RefreshFailed(500).requires_reauth());
        assert!(!ApiError::RequestTimeout.requires_reauth());
    }

    #[test]
    fn test_user_messages_distinguish_timeout_from_network() {
        let timeout = ApiError::RequestTimeout.user_message();
        let network = ApiError::Network("connection refused".to_string()).user_message();
        assert_ne!(timeout, network);
    }
}
