//! Audit trail for token verification outcomes.

use serde::{Deserialize, Serialize};

/// Outcome of a single verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Validated,
    InvalidSignature,
    Expired,
    WrongAudience,
    WrongTopic,
    QueryTtlExceeded,
    ReplayAttempted,
    TenantMissing,
}

/// A single audit record, as specified for the Token Verifier component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub jti: String,
    pub sub: String,
    pub tid: String,
    pub topic: String,
    pub iat: i64,
    pub exp: i64,
    pub region: Option<String>,
    pub event_type: AuditEventType,
    pub event_ts: String,
    pub endpoint: String,
    pub success: bool,
    pub error_details: Option<String>,
    pub client_ip_hash: Option<String>,
    pub user_agent_prefix: Option<String>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(
        jti: impl Into<String>,
        sub: impl Into<String>,
        tid: impl Into<String>,
        topic: impl Into<String>,
        iat: i64,
        exp: i64,
        event_type: AuditEventType,
        endpoint: impl Into<String>,
        error_details: Option<String>,
    ) -> Self {
        let success = matches!(event_type, AuditEventType::Validated);
        Self {
            jti: jti.into(),
            sub: sub.into(),
            tid: tid.into(),
            topic: topic.into(),
            iat,
            exp,
            region: None,
            event_type,
            event_ts: chrono::Utc::now().to_rfc3339(),
            endpoint: endpoint.into(),
            success,
            error_details,
            client_ip_hash: None,
            user_agent_prefix: None,
        }
    }

    /// Attaches the region named by the token and the requester's hashed IP
    /// and truncated User-Agent, as captured by the original auditing
    /// service (`token_auditing.py`'s `region`/`client_ip`/`user_agent`
    /// fields).
    #[must_use]
    pub fn with_request_context(mut self, region: Option<String>, ctx: &RequestContext) -> Self {
        self.region = region;
        self.client_ip_hash = ctx.client_ip.as_deref().map(hash_client_ip);
        self.user_agent_prefix = ctx.user_agent.as_deref().map(truncate_user_agent);
        self
    }
}

/// Per-request caller metadata, threaded through `verify`/`verify_access`
/// so the resulting audit record can carry a hashed client IP and a
/// truncated User-Agent without storing either raw.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// SHA-256 of the IP, truncated to 16 hex characters — enough to dedupe
/// without retaining the raw address.
#[must_use]
pub fn hash_client_ip(ip: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Caps a User-Agent string at 200 bytes for storage.
#[must_use]
pub fn truncate_user_agent(user_agent: &str) -> String {
    user_agent.chars().take(200).collect()
}

/// Sink for audit records. The default logs via `tracing`; a production
/// deployment typically pairs this with a Redis- or database-backed sink
/// for the retention window described in the data model.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord);
}

/// Logs each audit record as a structured `tracing` event at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            jti = %record.jti,
            sub = %record.sub,
            tid = %record.tid,
            topic = %record.topic,
            event_type = ?record.event_type,
            success = record.success,
            endpoint = %record.endpoint,
            "token audit event"
        );
    }
}

/// Discards every record. Selected when `TOKEN_AUDITING_ENABLED=false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_flag_derived_from_event_type() {
        let validated = AuditRecord::new("j", "s", "t", "topic", 0, 60, AuditEventType::Validated, "sse", None);
        assert!(validated.success);

        let replay = AuditRecord::new("j", "s", "t", "topic", 0, 60, AuditEventType::ReplayAttempted, "sse", None);
        assert!(!replay.success);
    }

    #[test]
    fn request_context_populates_hashed_ip_and_truncated_agent() {
        let ctx = RequestContext {
            client_ip: Some("203.0.113.7".to_string()),
            user_agent: Some("a".repeat(250)),
        };
        let record = AuditRecord::new("j", "s", "t", "topic", 0, 60, AuditEventType::Validated, "sse", None)
            .with_request_context(Some("us-east-1".to_string()), &ctx);
        assert_eq!(record.region.as_deref(), Some("us-east-1"));
        assert_eq!(record.client_ip_hash.as_ref().map(String::len), Some(16));
        assert_eq!(record.user_agent_prefix.as_ref().map(String::len), Some(200));
    }

    #[test]
    fn request_context_absent_leaves_fields_none() {
        let record = AuditRecord::new("j", "s", "t", "topic", 0, 60, AuditEventType::Validated, "sse", None)
            .with_request_context(None, &RequestContext::default());
        assert!(record.region.is_none());
        assert!(record.client_ip_hash.is_none());
        assert!(record.user_agent_prefix.is_none());
    }
}
