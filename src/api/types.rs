use serde::{Deserialize, Serialize};

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub timeframe: Option<String>,
    /// Comma-separated chain names.
    pub chains: Option<String>,
    pub skip_cache: Option<bool>,
    pub request_id: Option<String>,
    pub current_value: Option<f64>,
}

// ============================================================
// Responses
// ============================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub chains: Vec<String>,
    pub default_chains: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
