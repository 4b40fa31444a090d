//! Token claims carried by stream bearer tokens.

use serde::{Deserialize, Serialize};

/// Roles eligible for privileged (debug/admin) stream endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Subscriber,
    Publisher,
    Admin,
    Owner,
}

impl Role {
    /// True for roles allowed to hit `_stats`/`_topics`/`_resume`.
    #[must_use]
    pub fn can_debug(&self) -> bool {
        matches!(self, Role::Admin | Role::Owner)
    }
}

/// Claims carried by a stream bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Audience; must equal `"stream"` for these tokens.
    pub aud: String,
    /// Principal (end user or service).
    pub sub: String,
    /// Tenant the token is scoped to.
    pub tid: String,
    /// Topic the token is scoped to.
    pub topic: String,
    /// Space-delimited scope string, e.g. `"stream:read stream:debug"`.
    #[serde(default)]
    pub scope: String,
    /// Role for RBAC checks on privileged endpoints.
    pub role: Role,
    /// Unique token id; enforced single-use.
    pub jti: String,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
    /// Nested metadata shape some identity providers (Supabase, Auth0) use
    /// instead of a top-level `tid`. Only consulted when `tid` is empty.
    #[serde(default)]
    pub user_metadata: Option<serde_json::Value>,
    /// Same fallback, for providers that nest tenant scoping under
    /// `app_metadata` rather than `user_metadata`.
    #[serde(default)]
    pub app_metadata: Option<serde_json::Value>,
    /// Regional binding carried by the issuer, surfaced on audit records.
    #[serde(default)]
    pub region: Option<String>,
}

impl Claims {
    /// True once `exp` has passed (no leeway; callers needing clock-skew
    /// tolerance should additionally check `AuthContext`'s leeway at decode
    /// time, which is the first line of defense).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() > self.exp
    }

    /// Whether `scope` contains the given space-delimited scope token.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }

    /// Resolves the effective tenant id: `tid` if present, else
    /// `user_metadata.tenant_id`, else `app_metadata.tenant_id`.
    #[must_use]
    pub fn effective_tid(&self) -> Option<&str> {
        if !self.tid.is_empty() {
            return Some(self.tid.as_str());
        }
        self.user_metadata
            .as_ref()
            .and_then(|v| v.get("tenant_id"))
            .or_else(|| self.app_metadata.as_ref().and_then(|v| v.get("tenant_id")))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp_offset_secs: i64) -> Claims {
        Claims {
            iss: "issuer".into(),
            aud: "stream".into(),
            sub: "user-1".into(),
            tid: "tenant-1".into(),
            topic: "kp.v1.moon.chain".into(),
            scope: "stream:read stream:debug".into(),
            role: Role::Subscriber,
            jti: "jti-1".into(),
            iat: chrono::Utc::now().timestamp(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
            user_metadata: None,
            app_metadata: None,
            region: None,
        }
    }

    #[test]
    fn expired_claims_detected() {
        assert!(claims(-10).is_expired());
        assert!(!claims(10).is_expired());
    }

    #[test]
    fn scope_lookup_is_token_exact() {
        let c = claims(60);
        assert!(c.has_scope("stream:debug"));
        assert!(!c.has_scope("stream"));
    }

    #[test]
    fn debug_role_gate() {
        assert!(!Role::Subscriber.can_debug());
        assert!(Role::Admin.can_debug());
        assert!(Role::Owner.can_debug());
    }

    #[test]
    fn effective_tid_prefers_top_level_tid() {
        let c = claims(60);
        assert_eq!(c.effective_tid(), Some("tenant-1"));
    }

    #[test]
    fn effective_tid_falls_back_to_nested_user_metadata() {
        let mut c = claims(60);
        c.tid = String::new();
        c.user_metadata = Some(serde_json::json!({"tenant_id": "tenant-from-user-metadata"}));
        assert_eq!(c.effective_tid(), Some("tenant-from-user-metadata"));
    }

    #[test]
    fn effective_tid_falls_back_to_nested_app_metadata() {
        let mut c = claims(60);
        c.tid = String::new();
        c.app_metadata = Some(serde_json::json!({"tenant_id": "tenant-from-app-metadata"}));
        assert_eq!(c.effective_tid(), Some("tenant-from-app-metadata"));
    }

    #[test]
    fn effective_tid_none_when_no_tenant_anywhere() {
        let mut c = claims(60);
        c.tid = String::new();
        assert_eq!(c.effective_tid(), None);
    }
}
