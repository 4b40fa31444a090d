//! Publish inlet: a JWT-gated HTTP endpoint, plus an optional dev-only
//! shared-secret inlet for non-production environments.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::ApiError;
use crate::sse::{bearer_token, request_context};
use crate::state::AppState;
use streamcore_auth::TokenSource;

#[derive(Serialize)]
pub struct PublishResponse {
    ok: bool,
    topic: String,
    payload_size: usize,
    subscribers: usize,
    ts: String,
}

#[instrument(skip(state, headers, payload), fields(topic = %topic))]
pub async fn publish_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<PublishResponse>, ApiError> {
    if !state.config.publisher_enabled {
        return Err(ApiError::ScopeMissing);
    }
    if !state.config.topic_allowed(&topic) {
        return Err(ApiError::TopicNotAllowed(topic));
    }

    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    let ctx = state
        .verifier
        .verify_access_with_context(
            &token,
            None,
            TokenSource::Header,
            "publish",
            |_role| true,
            &request_context(&headers),
        )
        .await?;
    if !ctx.raw_claims.has_scope("stream:publish") {
        return Err(ApiError::ScopeMissing);
    }

    if !state.rate_limiter.allow_qps(&ctx.tid, 5.0).await {
        let snapshot = state.rate_limiter.snapshot(&ctx.tid).await;
        return Err(ApiError::QpsLimit {
            retry_after_secs: 1,
            limit: snapshot.limit,
            remaining: snapshot.remaining,
        });
    }

    let payload_size = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0);
    let envelope = state.broker.publish(&topic, payload, "update").await?;
    let stats = state.broker.stats().await;
    let subscribers = stats.topics.get(&topic).copied().unwrap_or(0);

    Ok(Json(PublishResponse {
        ok: true,
        topic,
        payload_size,
        subscribers,
        ts: envelope.ts,
    }))
}

/// `POST /_dev_publish/{topic}?token=<shared-secret>`, enabled only when
/// `STREAM_DEV_PUBLISH_ENABLED=true`; gated by a shared secret rather than a
/// bearer token, for local development and integration tests.
#[instrument(skip(state, payload), fields(topic = %topic))]
pub async fn dev_publish_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    axum::extract::Query(query): axum::extract::Query<std::collections::HashMap<String, String>>,
    Json(payload): Json<Value>,
) -> Result<Json<PublishResponse>, ApiError> {
    if !state.config.dev_publish_enabled {
        return Err(ApiError::ScopeMissing);
    }
    let expected = state.config.dev_publish_token.as_deref().unwrap_or("");
    let provided = query.get("token").map(String::as_str).unwrap_or("");
    if expected.is_empty() || provided != expected {
        return Err(ApiError::MissingToken);
    }
    if !state.config.topic_allowed(&topic) {
        return Err(ApiError::TopicNotAllowed(topic));
    }

    let payload_size = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0);
    let envelope = state.broker.publish(&topic, payload, "update").await?;
    let stats = state.broker.stats().await;
    let subscribers = stats.topics.get(&topic).copied().unwrap_or(0);

    Ok(Json(PublishResponse {
        ok: true,
        topic,
        payload_size,
        subscribers,
        ts: envelope.ts,
    }))
}
