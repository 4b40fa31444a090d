//! SSE delivery endpoint: `AUTH -> ADMIT -> SUBSCRIBE -> [RESUME?] -> LIVE -> TERMINATED`.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use tracing::{info, instrument, warn};

use crate::error::ApiError;
use crate::state::AppState;
use streamcore_auth::{RequestContext, TokenSource};

/// Default advertised reconnect delay, carried in the SSE `retry:` framing
/// hint so clients back off instead of hot-looping on disconnect.
const RETRY_HINT_MS: u64 = 15_000;

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Builds audit request metadata from the client's `X-Forwarded-For`
/// (first hop) or peer address header, and `User-Agent`.
pub(crate) fn request_context(headers: &HeaderMap) -> RequestContext {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    RequestContext { client_ip, user_agent }
}

fn last_event_id(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .or_else(|| query.get("last_event_id").map(String::as_str))
        .and_then(|v| v.parse().ok())
}

/// `GET /stream/{topic}?token=<jwt>`, or `Authorization: Bearer <jwt>`.
#[instrument(skip(state, headers), fields(topic = %topic))]
pub async fn stream_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (token, source) = match bearer_token(&headers) {
        Some(t) => (t, TokenSource::Header),
        None => match query.get("token") {
            Some(t) => (t.clone(), TokenSource::Query),
            None => return Err(ApiError::MissingToken),
        },
    };

    let ctx = state
        .verifier
        .verify_with_context(&token, Some(&topic), source, "sse", &request_context(&headers))
        .await?;

    if !state.rate_limiter.allow_connection(&ctx.tid).await {
        return Err(ApiError::ConnectionLimit);
    }
    if !state.rate_limiter.allow_qps(&ctx.tid, 1.0).await {
        state.rate_limiter.remove_connection(&ctx.tid).await;
        let snapshot = state.rate_limiter.snapshot(&ctx.tid).await;
        return Err(ApiError::QpsLimit {
            retry_after_secs: 1,
            limit: snapshot.limit,
            remaining: snapshot.remaining,
        });
    }
    state.rate_limiter.add_connection(&ctx.tid).await;

    let mut handle = state.broker.subscribe(&topic).await;
    let resume_from = last_event_id(&headers, &query);

    let broker = state.broker.clone();
    let rate_limiter = state.rate_limiter.clone();
    let tenant_id = ctx.tid.clone();
    let heartbeat_secs = state.config.heartbeat_secs;
    let query_token_exp = (source == TokenSource::Query).then_some(ctx.raw_claims.exp);

    let sse_stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().retry(std::time::Duration::from_millis(RETRY_HINT_MS)));

        if let Some(last_seq) = resume_from {
            match broker.replay_since_or_exhausted(&topic, last_seq).await {
                Err(streamcore::Error::BufferExhausted { requested, window_start }) => {
                    broker.metrics().record_resume_request("exhausted");
                    if let Ok(event) = Event::default().event("reset").data("full-resync") {
                        yield Ok::<_, Infallible>(event);
                    }
                    warn!(topic = %topic, requested, window_start, "resume buffer exhausted, terminating for full resync");
                    broker.unsubscribe(handle).await;
                    rate_limiter.remove_connection(&tenant_id).await;
                    return;
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "resume replay failed unexpectedly, continuing without replay");
                }
                Ok(items) => {
                    broker.metrics().record_resume_request("replayed");
                    for json in items {
                        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&json) {
                            let seq = value.get("seq").and_then(|s| s.as_u64()).unwrap_or(0);
                            let event_name = value
                                .get("event")
                                .and_then(|e| e.as_str())
                                .unwrap_or("update")
                                .to_string();
                            if let Ok(event) = Event::default().id(seq.to_string()).event(event_name).data(json) {
                                yield Ok(event);
                            }
                        }
                    }
                }
            }
        }

        loop {
            if let Some(exp) = query_token_exp {
                if chrono::Utc::now().timestamp() > exp {
                    if let Ok(event) = Event::default().event("error").data(r#"{"code":"token_expired","message":"query token expired"}"#) {
                        yield Ok(event);
                    }
                    warn!(topic = %topic, "query token expired mid-stream, terminating");
                    broker.unsubscribe(handle).await;
                    rate_limiter.remove_connection(&tenant_id).await;
                    return;
                }
            }
            let envelope = handle.next_message(heartbeat_secs).await;
            if envelope.topic == streamcore::HEARTBEAT_TOPIC {
                yield Ok(Event::default().comment("hb"));
                continue;
            }
            match envelope.to_json() {
                Ok(json) => {
                    if let Ok(event) = Event::default()
                        .id(envelope.seq.to_string())
                        .event(envelope.event.clone())
                        .data(json)
                    {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "failed to serialize envelope for SSE frame");
                }
            }
        }
    };

    info!(tenant_id = %ctx.tid, topic = %topic, "sse stream established");

    let mut response = Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(heartbeat_secs)))
        .into_response();

    let headers_mut = response.headers_mut();
    headers_mut.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers_mut.insert(axum::http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers_mut.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    headers_mut.insert(axum::http::header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers_mut.insert(axum::http::header::VARY, HeaderValue::from_static("Authorization, Accept"));
    if source == TokenSource::Query {
        headers_mut.insert("Warning", HeaderValue::from_static("299 - \"query-parameter tokens are deprecated\""));
        headers_mut.insert("Deprecation", HeaderValue::from_static("true"));
        headers_mut.insert("Sunset", HeaderValue::from_static("Wed, 01 Jan 2027 00:00:00 GMT"));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn bearer_token_absent_without_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn last_event_id_prefers_header_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", HeaderValue::from_static("42"));
        let mut query = HashMap::new();
        query.insert("last_event_id".to_string(), "7".to_string());
        assert_eq!(last_event_id(&headers, &query), Some(42));
    }

    #[test]
    fn last_event_id_falls_back_to_query() {
        let mut query = HashMap::new();
        query.insert("last_event_id".to_string(), "7".to_string());
        assert_eq!(last_event_id(&HeaderMap::new(), &query), Some(7));
    }

    #[test]
    fn request_context_prefers_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(axum::http::header::USER_AGENT, HeaderValue::from_static("test-agent/1.0"));
        let ctx = request_context(&headers);
        assert_eq!(ctx.client_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(ctx.user_agent.as_deref(), Some("test-agent/1.0"));
    }

    #[test]
    fn request_context_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        let ctx = request_context(&headers);
        assert_eq!(ctx.client_ip.as_deref(), Some("198.51.100.4"));
    }

    #[test]
    fn request_context_empty_without_headers() {
        let ctx = request_context(&HeaderMap::new());
        assert!(ctx.client_ip.is_none());
        assert!(ctx.user_agent.is_none());
    }
}
