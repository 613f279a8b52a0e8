// API request/response types for the Anima backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Body of `POST /v1/auth/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Tokens and session metadata issued at sign-in.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub session_id: Option<i64>,
    pub user_name: Option<String>,
}

/// Body of `POST /v1/auth/register`.
#[derive(Debug, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub user_name: String,
}

/// One emotion classification as produced by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Dominant emotion label, e.g. "happy"
    pub emotion: String,

    /// Confidence for the dominant emotion, 0.0..=1.0
    pub confidence: f64,

    /// Epoch milliseconds; stamped by the save guard at submission time
    #[serde(default)]
    pub timestamp: i64,

    /// Full per-emotion score map
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub emotions_detected: HashMap<String, f64>,
}

/// Acknowledgement from `POST /v1/analytics/save-analysis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub message: String,
}

/// Dashboard statistics from `GET /v1/analytics/stats`.
#[derive(Debug, Deserialize)]
pub struct UserStats {
    pub total_analyses: u64,
    pub most_frequent_emotion: Option<String>,
    pub average_confidence: f64,
    pub streak: u32,
    #[serde(default)]
    pub emotions_distribution: Vec<EmotionStats>,
    #[serde(default)]
    pub weekly_activity: Vec<WeeklyActivity>,
}

#[derive(Debug, Deserialize)]
pub struct EmotionStats {
    pub emotion: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Deserialize)]
pub struct WeeklyActivity {
    pub day: String,
    pub analyses_count: u64,
}

/// One saved analysis from `GET /v1/analytics/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub emotion: String,
    pub confidence: f64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub emotions_detected: HashMap<String, f64>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub analyses: Vec<HistoryEntry>,
    pub total: u64,
}

/// Error body shape used by the backend (`{"detail": "..."}`).
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: Option<String>,
}
