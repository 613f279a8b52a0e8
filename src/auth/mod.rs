// Authentication module
// Owns the credential record and its refresh lifecycle

mod jwt;
mod manager;
mod types;

pub use jwt::{decode_token, token_expiry_ms};
pub use manager::{TokenManager, REFRESH_BUFFER_MS};
pub use types::{RefreshRequest, RefreshResponse};
