//! Error types for token verification and audit.
//!
//! Follows a security-conscious split: `sanitize()` produces the message
//! that is safe to put on the wire, while `Display` (used in logs) carries
//! the full detail.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("token replay detected for jti {0}")]
    ReplayAttempted(String),

    #[error("query-token TTL exceeded: {ttl_secs}s > {max_secs}s")]
    QueryTtlExceeded { ttl_secs: i64, max_secs: i64 },

    #[error("tenant id missing from claims")]
    TenantMissing,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("JTI store error: {0}")]
    JtiStore(String),
}

impl Error {
    /// Message safe to return to an external client; never echoes claim
    /// contents, token fragments, or backend error detail.
    #[must_use]
    pub fn sanitize(&self) -> &'static str {
        match self {
            Error::Authentication(_) | Error::Jwt(_) => "invalid_token",
            Error::Authorization(_) => "insufficient_scope",
            Error::ReplayAttempted(_) => "replay_attempted",
            Error::QueryTtlExceeded { .. } => "query_ttl_exceeded",
            Error::TenantMissing => "tenant_missing",
            Error::Configuration(_) => "server_misconfigured",
            Error::JtiStore(_) => "server_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_never_echoes_detail() {
        let e = Error::Authentication("signature mismatch for sub=alice".to_string());
        assert_eq!(e.sanitize(), "invalid_token");
        assert!(!e.sanitize().contains("alice"));
    }
}
