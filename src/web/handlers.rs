//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, Period};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;

/// Query limits for the raw ping listing.
const DEFAULT_PING_LIMIT: i64 = 100;
const MAX_PING_LIMIT: i64 = 1000;

// ============================================================================
// Scheduler trigger
// ============================================================================

pub async fn handle_tick(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.scheduler.run_tick().await;
    Json(summary)
}

// ============================================================================
// Bucket query
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BucketsQuery {
    pub period: String,
}

pub async fn handle_get_buckets(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<BucketsQuery>,
) -> impl IntoResponse {
    let period = match Period::parse(&query.period) {
        Some(p) => p,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                format!("unsupported period: {}", query.period),
            )
                .into_response()
        }
    };

    if let Err(e) = state.store.get_monitor(id) {
        return match e {
            DbError::NotFound => (StatusCode::NOT_FOUND, "Monitor not found").into_response(),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
        };
    }

    match state.reader.read_buckets(id, period) {
        Ok(slots) => Json(slots).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Raw ping listing
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PingsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn handle_get_pings(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PingsQuery>,
) -> impl IntoResponse {
    if let Err(e) = state.store.get_monitor(id) {
        return match e {
            DbError::NotFound => (StatusCode::NOT_FOUND, "Monitor not found").into_response(),
            other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
        };
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PING_LIMIT)
        .clamp(1, MAX_PING_LIMIT);

    match state.store.get_recent_pings(id, limit) {
        Ok(pings) => Json(pings).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
