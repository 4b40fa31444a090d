use thiserror::Error;

/// Errors raised by the low-level resume-store and sequencer backends.
///
/// Kept distinct from [`Error`] so that a Redis hiccup can be recovered
/// locally (fall back to the in-memory ring / process counter) without
/// forcing every caller up the stack to understand Redis failure modes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Redis connection or command error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization/deserialization of a stored envelope failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Backend unavailable (not configured, or closed).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Redis(_) | BackendError::Timeout | BackendError::Unavailable(_) => {
                Error::BackendUnavailable(e.to_string())
            }
            BackendError::Serialization(err) => Error::InvalidEnvelope(err.to_string()),
        }
    }
}

/// Public error type for the streaming core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Publish payload exceeded the configured size limit.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Envelope could not be built or parsed.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A resume-store or sequencer backend failed; caller should treat as
    /// a degraded-but-recovered condition, not a hard failure.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Client's last-seen sequence predates the resume window; a full
    /// resync is required instead of a partial replay.
    #[error("resume buffer exhausted: requested seq {requested}, window starts at {window_start}")]
    BufferExhausted { requested: u64, window_start: u64 },

    /// Admission was refused by the rate limiter.
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[from] crate::rate_limiter::LimitKind),

    /// Topic is not present in the publish allowlist.
    #[error("topic not allowed: {0}")]
    TopicNotAllowed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_converts_to_public_error() {
        let e = BackendError::Unavailable("redis down".into());
        let public: Error = e.into();
        assert!(matches!(public, Error::BackendUnavailable(_)));
    }

    #[test]
    fn buffer_exhausted_display() {
        let e = Error::BufferExhausted {
            requested: 10,
            window_start: 50,
        };
        assert_eq!(
            e.to_string(),
            "resume buffer exhausted: requested seq 10, window starts at 50"
        );
    }
}
