use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::accumulator::BatchAccumulator;
use crate::contracts::{Event, StorageError, Uploader};
use crate::metrics::IngestMetrics;

/// Header naming the customer tier of an ingest request.
pub const CUSTOMER_TIER_HEADER: &str = "x-customer-tier";

/// Application state shared across handlers.
pub struct AppState<U: Uploader + 'static> {
    pub accumulator: Arc<BatchAccumulator<U>>,
    pub allowed_tiers: HashSet<String>,
    pub metrics: Arc<IngestMetrics>,
}

impl<U: Uploader + 'static> AppState<U> {
    pub fn new(
        accumulator: Arc<BatchAccumulator<U>>,
        allowed_tiers: impl IntoIterator<Item = String>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            accumulator,
            allowed_tiers: allowed_tiers.into_iter().collect(),
            metrics,
        }
    }

    fn is_allowed(&self, tier: &str) -> bool {
        self.allowed_tiers.contains(tier)
    }
}

/// Body of every ingest response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
}

impl ApiResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".into(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: message.into(),
        }
    }
}

/// API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized customer tier")]
    UnauthorizedTier(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) | ApiError::UnauthorizedTier(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ApiResponse::error(self.to_string()))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// POST /api/v1/ingest
/// Validates the event and tier, then hands the event to the accumulator.
pub async fn ingest<U: Uploader + 'static>(
    State(state): State<Arc<AppState<U>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse>), ApiError> {
    state.metrics.record_request();

    let result = admit_request(&state, &headers, &body);
    if let Err(e) = &result {
        if !matches!(e, ApiError::Internal(_)) {
            state.metrics.record_rejected();
        }
    }
    result?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success("Event accepted")),
    ))
}

fn admit_request<U: Uploader + 'static>(
    state: &AppState<U>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let event = Event::from_json(body)?;

    let tier = headers
        .get(CUSTOMER_TIER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing X-Customer-Tier header".into()))?;

    if !state.is_allowed(tier) {
        tracing::warn!(tier = tier, "Rejected event for unknown customer tier");
        return Err(ApiError::UnauthorizedTier(tier.to_string()));
    }
    state.metrics.record_filtered();

    state.accumulator.admit(event, tier)?;
    Ok(())
}

/// GET /health
/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy"
    }))
}

/// GET /metrics
/// Returns metrics in Prometheus text exposition format.
pub async fn metrics<U: Uploader + 'static>(
    State(state): State<Arc<AppState<U>>>,
) -> impl IntoResponse {
    let buffers = state.accumulator.snapshot();
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.format_prometheus(&buffers),
    )
}
