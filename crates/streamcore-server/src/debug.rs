//! Debug/observability endpoints: `_stats`, `_topics`, `_resume`, `_health`,
//! `_metrics`. The first three require admin role or `stream:debug` scope;
//! health and metrics are unauthenticated, matching the teacher's own
//! `/health` and `/metrics` convention.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use serde_json::json;

use crate::error::ApiError;
use crate::sse::{bearer_token, request_context};
use crate::state::AppState;
use streamcore_auth::TokenSource;

async fn require_debug_access(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer_token(headers).ok_or(ApiError::MissingToken)?;
    let ctx = state
        .verifier
        .verify_with_context(&token, None, TokenSource::Header, "debug", &request_context(headers))
        .await?;
    if !ctx.role.can_debug() && !ctx.raw_claims.has_scope("stream:debug") {
        return Err(ApiError::ScopeMissing);
    }
    Ok(())
}

pub async fn stats_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    require_debug_access(&state, &headers).await?;
    let stats = state.broker.stats().await;
    Ok(Json(json!({
        "published": stats.published,
        "dropped": stats.dropped,
        "subscribers": stats.subscribers,
        "rate_limiter_violations": state.rate_limiter.violation_count(),
    })))
}

pub async fn topics_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    require_debug_access(&state, &headers).await?;
    let stats = state.broker.stats().await;
    Ok(Json(json!({ "topics": stats.topics })))
}

pub async fn resume_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_debug_access(&state, &headers).await?;
    let topic = query.get("topic").cloned().unwrap_or_default();
    let stats = state.broker.resume_stats(&topic).await;
    Ok(Json(json!({
        "topic": topic,
        "size": stats.size,
        "min_seq": stats.min_seq,
        "max_seq": stats.max_seq,
    })))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    stats: serde_json::Value,
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.broker.stats().await;
    Json(HealthResponse {
        status: "healthy",
        stats: json!({
            "published": stats.published,
            "subscribers": stats.subscribers,
            "topics": stats.topics.len(),
        }),
    })
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}
