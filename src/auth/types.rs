// Authentication wire types

use serde::{Deserialize, Serialize};

/// Body of `POST /v1/auth/refresh`.
#[derive(Debug, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Successful refresh response.
///
/// The server may rotate the refresh token; when it does, the new one
/// replaces the stored one.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}
