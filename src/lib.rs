// Anima client SDK - library root
//
// Client-side core for the Anima emotion-analysis product: token lifecycle
// management with single-flight refresh, authenticated request dispatch with
// retry-on-401, and duplicate suppression for analysis saves.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http_client;
pub mod models;
pub mod storage;

pub use api::AnimaClient;
pub use auth::TokenManager;
pub use config::Config;
pub use dedup::SaveGuard;
pub use error::{ApiError, StorageError};
pub use http_client::AnimaHttpClient;
