//! HTTP-facing error type: maps every internal failure kind to the
//! problem-document response shape and the correct status code, never
//! leaking backend error detail across the wire.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("authentication failed: {0}")]
    Auth(#[from] streamcore_auth::Error),
    #[error("scope missing for this endpoint")]
    ScopeMissing,
    #[error("topic not allowed: {0}")]
    TopicNotAllowed(String),
    #[error("connection limit reached")]
    ConnectionLimit,
    #[error("qps limit reached")]
    QpsLimit { retry_after_secs: u64, limit: u32, remaining: u32 },
    #[error(transparent)]
    Core(#[from] streamcore::Error),
}

#[derive(Serialize)]
struct ProblemDocument {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'static str,
    status: u16,
    detail: String,
    code: &'static str,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingToken => "missing_token",
            ApiError::Auth(e) => e.sanitize(),
            ApiError::ScopeMissing => "scope_missing",
            ApiError::TopicNotAllowed(_) => "topic_not_allowed",
            ApiError::ConnectionLimit => "connection_limit",
            ApiError::QpsLimit { .. } => "qps_limit",
            ApiError::Core(streamcore::Error::PayloadTooLarge(_)) => "payload_too_large",
            ApiError::Core(streamcore::Error::RateLimited(_)) => "qps_limit",
            ApiError::Core(streamcore::Error::TopicNotAllowed(_)) => "topic_not_allowed",
            ApiError::Core(_) => "broker_unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::ScopeMissing | ApiError::TopicNotAllowed(_) => StatusCode::FORBIDDEN,
            ApiError::ConnectionLimit | ApiError::QpsLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Core(streamcore::Error::PayloadTooLarge(_)) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Core(streamcore::Error::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Core(streamcore::Error::TopicNotAllowed(_)) => StatusCode::FORBIDDEN,
            ApiError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Auth(_) => "authentication failed".to_string(),
            other => other.to_string(),
        };
        let body = ProblemDocument {
            kind: "about:blank",
            title: status.canonical_reason().unwrap_or("Error"),
            status: status.as_u16(),
            detail,
            code: self.code(),
        };
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }
        if let ApiError::QpsLimit { retry_after_secs, limit, remaining } = &self {
            if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, v);
            }
            if let Ok(v) = HeaderValue::from_str(&limit.to_string()) {
                response.headers_mut().insert(
                    axum::http::header::HeaderName::from_static("x-ratelimit-limit"),
                    v,
                );
            }
            if let Ok(v) = HeaderValue::from_str(&remaining.to_string()) {
                response.headers_mut().insert(
                    axum::http::header::HeaderName::from_static("x-ratelimit-remaining"),
                    v,
                );
            }
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let limit_type = match &self {
                ApiError::ConnectionLimit => "connections",
                _ => "qps",
            };
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-ratelimit-limit-type"),
                HeaderValue::from_static(limit_type),
            );
        }
        response
    }
}
