use alloy::primitives::Address;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::str::FromStr;
use std::sync::Arc;

use super::types::*;
use super::AppState;
use crate::error::HistoryError;
use crate::history::HistoryOptions;
use crate::progress::ProgressRecord;
use crate::timeframe::Timeframe;
use crate::types::HistoryResult;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

fn parse_address(hex: &str) -> Result<Address, (StatusCode, Json<ErrorResponse>)> {
    Address::from_str(hex.trim())
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid wallet address: {}", e)))
}

fn parse_timeframe(raw: Option<&str>) -> Result<Timeframe, (StatusCode, Json<ErrorResponse>)> {
    match raw {
        None => Ok(Timeframe::Week),
        Some(s) => Timeframe::from_str(s).map_err(|e| api_error(StatusCode::BAD_REQUEST, e)),
    }
}

fn parse_chains(raw: Option<&str>) -> Option<Vec<String>> {
    let chains: Vec<String> = raw?
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    (!chains.is_empty()).then_some(chains)
}

fn history_error(e: HistoryError) -> (StatusCode, Json<ErrorResponse>) {
    if e.is_hard_failure() {
        api_error(StatusCode::BAD_REQUEST, e.to_string())
    } else {
        api_error(StatusCode::BAD_GATEWAY, e.to_string())
    }
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        chains: state.chains.clone(),
        default_chains: state.default_chains.clone(),
    }))
}

// ============================================================
// Portfolio history
// ============================================================

pub async fn wallet_history(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<HistoryResult> {
    let wallet = parse_address(&address)?;
    let timeframe = parse_timeframe(params.timeframe.as_deref())?;
    if params.current_value.is_some_and(|v| !v.is_finite() || v < 0.0) {
        return Err(api_error(StatusCode::BAD_REQUEST, "current_value must be a non-negative number"));
    }

    let options = HistoryOptions {
        chains: parse_chains(params.chains.as_deref()),
        skip_cache: params.skip_cache.unwrap_or(false),
        request_id: params.request_id,
        current_value: params.current_value,
    };

    state
        .service
        .get_historical_portfolio(wallet, timeframe, options)
        .await
        .map(Json)
        .map_err(history_error)
}

pub async fn progress(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<ProgressRecord> {
    state
        .service
        .get_progress(&request_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No progress for request '{}'", request_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chains() {
        assert_eq!(
            parse_chains(Some("ethereum, base,,")),
            Some(vec!["ethereum".to_string(), "base".to_string()])
        );
        assert_eq!(parse_chains(Some(" , ")), None);
        assert_eq!(parse_chains(None), None);
    }

    #[test]
    fn test_parse_inputs() {
        assert!(parse_address("0x1111111111111111111111111111111111111111").is_ok());
        let (status, _) = parse_address("0x123").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(parse_timeframe(None).unwrap(), Timeframe::Week);
        assert_eq!(parse_timeframe(Some("90d")).unwrap(), Timeframe::Quarter);
        assert!(parse_timeframe(Some("2w")).is_err());
    }

    #[test]
    fn test_only_configuration_errors_are_client_errors() {
        let (status, _) = history_error(HistoryError::Configuration("unsupported chain 'foo'".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = history_error(HistoryError::unavailable("snapshots", "down"));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
