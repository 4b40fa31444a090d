//! Token verification: signature, audience, topic scope, query-token TTL,
//! single-use enforcement, and audit logging — in that order, matching the
//! algorithm in the component design.

use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::audit::{AuditEventType, AuditRecord, AuditSink, RequestContext, TracingAuditSink};
use crate::claims::Claims;
use crate::error::{Error, Result};
use crate::jti_store::{jti_ttl_secs, InMemoryJtiStore, JtiStore};

/// Maximum TTL, in seconds, allowed for a token carried as a query
/// parameter: 10 minutes plus 30s of clock-skew margin.
pub const MAX_QUERY_TOKEN_TTL_SECS: i64 = 630;

/// Where the token was carried; affects the TTL bound that's enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Header,
    Query,
}

/// Context returned after a successful verification.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub sub: String,
    pub tid: String,
    pub role: crate::claims::Role,
    pub scope: String,
    pub raw_claims: Claims,
}

/// Verifies stream bearer tokens against a single symmetric secret or an
/// asymmetric public key. Holds a [`JtiStore`] for single-use enforcement
/// and an [`AuditSink`] for recording every verification attempt.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    audience: String,
    issuer: Option<String>,
    leeway_secs: u64,
    require_tenant: bool,
    jti_store: Arc<dyn JtiStore>,
    audit_sink: Arc<dyn AuditSink>,
}

/// Builder-style configuration, mirroring the component design's startup
/// invariant: exactly one of an asymmetric key or a symmetric secret may
/// be configured.
pub struct TokenVerifierConfig {
    pub audience: String,
    pub issuer: Option<String>,
    pub leeway_secs: u64,
    pub require_tenant: bool,
}

impl Default for TokenVerifierConfig {
    fn default() -> Self {
        Self {
            audience: "stream".to_string(),
            issuer: None,
            leeway_secs: 60,
            require_tenant: true,
        }
    }
}

impl TokenVerifier {
    /// Builds a verifier from an HMAC secret. The secret must be at least
    /// 32 bytes; shorter secrets are a fatal startup misconfiguration.
    pub fn from_secret(secret: &str, config: TokenVerifierConfig) -> Result<Self> {
        if secret.len() < 32 {
            return Err(Error::Configuration(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }
        Ok(Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            audience: config.audience,
            issuer: config.issuer,
            leeway_secs: config.leeway_secs,
            require_tenant: config.require_tenant,
            jti_store: Arc::new(InMemoryJtiStore::new()),
            audit_sink: Arc::new(TracingAuditSink),
        })
    }

    /// Builds a verifier from an RSA/EC public key in PEM form.
    pub fn from_public_key_pem(pem: &[u8], algorithm: Algorithm, config: TokenVerifierConfig) -> Result<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(pem)
            .or_else(|_| DecodingKey::from_ec_pem(pem))
            .map_err(|_| Error::Configuration("invalid public key PEM".to_string()))?;
        Ok(Self {
            decoding_key,
            algorithm,
            audience: config.audience,
            issuer: config.issuer,
            leeway_secs: config.leeway_secs,
            require_tenant: config.require_tenant,
            jti_store: Arc::new(InMemoryJtiStore::new()),
            audit_sink: Arc::new(TracingAuditSink),
        })
    }

    /// Builds a verifier from an already-resolved decoding key and
    /// algorithm, e.g. one fetched from a JWKS endpoint at startup.
    #[must_use]
    pub fn from_decoding_key(decoding_key: DecodingKey, algorithm: Algorithm, config: TokenVerifierConfig) -> Self {
        Self {
            decoding_key,
            algorithm,
            audience: config.audience,
            issuer: config.issuer,
            leeway_secs: config.leeway_secs,
            require_tenant: config.require_tenant,
            jti_store: Arc::new(InMemoryJtiStore::new()),
            audit_sink: Arc::new(TracingAuditSink),
        }
    }

    /// Swaps in a different JTI store (e.g. Redis-backed, for multi-process
    /// deployments where single-use must be enforced across instances).
    #[must_use]
    pub fn with_jti_store(mut self, store: Arc<dyn JtiStore>) -> Self {
        self.jti_store = store;
        self
    }

    /// Swaps in a different audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = sink;
        self
    }

    fn decode_claims(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation.validate_exp = true;
        validation.leeway = self.leeway_secs;

        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        if data.claims.is_expired() {
            return Err(Error::Authentication("token expired".to_string()));
        }
        Ok(data.claims)
    }

    /// Runs the full verification algorithm: decode, audience/topic scope,
    /// query-token TTL bound, single-use enforcement, tenant extraction,
    /// and audit logging of the outcome.
    pub async fn verify(
        &self,
        token: &str,
        expected_topic: Option<&str>,
        source: TokenSource,
        endpoint: &str,
    ) -> Result<AuthContext> {
        self.verify_with_context(token, expected_topic, source, endpoint, &RequestContext::default())
            .await
    }

    /// Same as [`Self::verify`], additionally attaching the caller's hashed
    /// IP and truncated User-Agent to whichever audit record the outcome
    /// produces.
    pub async fn verify_with_context(
        &self,
        token: &str,
        expected_topic: Option<&str>,
        source: TokenSource,
        endpoint: &str,
        request_context: &RequestContext,
    ) -> Result<AuthContext> {
        let claims = match self.decode_claims(token) {
            Ok(c) => c,
            Err(e) => {
                self.audit_sink.record(
                    &AuditRecord::new(
                        "unknown",
                        "unknown",
                        "unknown",
                        expected_topic.unwrap_or(""),
                        0,
                        0,
                        AuditEventType::InvalidSignature,
                        endpoint,
                        Some(e.to_string()),
                    )
                    .with_request_context(None, request_context),
                );
                return Err(e);
            }
        };

        if let Some(topic) = expected_topic {
            if claims.topic != topic {
                self.audit_sink.record(
                    &AuditRecord::new(
                        &claims.jti, &claims.sub, &claims.tid, &claims.topic, claims.iat, claims.exp,
                        AuditEventType::WrongTopic, endpoint, None,
                    )
                    .with_request_context(claims.region.clone(), request_context),
                );
                return Err(Error::Authorization(format!(
                    "token scoped to topic {}, not {}",
                    claims.topic, topic
                )));
            }
        }

        if source == TokenSource::Query {
            let ttl = claims.exp - claims.iat;
            if ttl > MAX_QUERY_TOKEN_TTL_SECS {
                self.audit_sink.record(
                    &AuditRecord::new(
                        &claims.jti, &claims.sub, &claims.tid, &claims.topic, claims.iat, claims.exp,
                        AuditEventType::QueryTtlExceeded, endpoint, None,
                    )
                    .with_request_context(claims.region.clone(), request_context),
                );
                return Err(Error::QueryTtlExceeded {
                    ttl_secs: ttl,
                    max_secs: MAX_QUERY_TOKEN_TTL_SECS,
                });
            }
        }

        let ttl = jti_ttl_secs(claims.iat, claims.exp);
        if let Err(e) = self.jti_store.mark_used(&claims.jti, ttl).await {
            self.audit_sink.record(
                &AuditRecord::new(
                    &claims.jti, &claims.sub, &claims.tid, &claims.topic, claims.iat, claims.exp,
                    AuditEventType::ReplayAttempted, endpoint, None,
                )
                .with_request_context(claims.region.clone(), request_context),
            );
            crate::metrics::record_replay_attempted(endpoint);
            return Err(e);
        }

        let resolved_tid = claims.effective_tid().map(str::to_string);

        if self.require_tenant && resolved_tid.is_none() {
            self.audit_sink.record(
                &AuditRecord::new(
                    &claims.jti, &claims.sub, &claims.tid, &claims.topic, claims.iat, claims.exp,
                    AuditEventType::TenantMissing, endpoint, None,
                )
                .with_request_context(claims.region.clone(), request_context),
            );
            return Err(Error::TenantMissing);
        }
        let tid = resolved_tid.unwrap_or_default();

        self.audit_sink.record(
            &AuditRecord::new(
                &claims.jti, &claims.sub, &tid, &claims.topic, claims.iat, claims.exp,
                AuditEventType::Validated, endpoint, None,
            )
            .with_request_context(claims.region.clone(), request_context),
        );
        crate::metrics::record_validated(endpoint);

        Ok(AuthContext {
            sub: claims.sub.clone(),
            tid,
            role: claims.role,
            scope: claims.scope.clone(),
            raw_claims: claims,
        })
    }

    /// Verifies `token` and additionally requires `required_capability` to
    /// hold for the resolved role (RBAC gate for privileged endpoints).
    pub async fn verify_access(
        &self,
        token: &str,
        expected_topic: Option<&str>,
        source: TokenSource,
        endpoint: &str,
        required_capability: impl Fn(&crate::claims::Role) -> bool,
    ) -> Result<AuthContext> {
        self.verify_access_with_context(
            token,
            expected_topic,
            source,
            endpoint,
            required_capability,
            &RequestContext::default(),
        )
        .await
    }

    /// Same as [`Self::verify_access`], additionally attaching caller
    /// request metadata to the resulting audit record.
    pub async fn verify_access_with_context(
        &self,
        token: &str,
        expected_topic: Option<&str>,
        source: TokenSource,
        endpoint: &str,
        required_capability: impl Fn(&crate::claims::Role) -> bool,
        request_context: &RequestContext,
    ) -> Result<AuthContext> {
        let ctx = self
            .verify_with_context(token, expected_topic, source, endpoint, request_context)
            .await?;
        if !required_capability(&ctx.role) {
            return Err(Error::Authorization(format!(
                "sub {} does not have required role capability",
                ctx.sub
            )));
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::Role;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use uuid::Uuid;

    const SECRET: &str = "test-secret-that-is-at-least-32-characters-long";

    fn make_token(topic: &str, ttl_secs: i64, role: Role) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: "issuer".into(),
            aud: "stream".into(),
            sub: "user-1".into(),
            tid: "tenant-1".into(),
            topic: topic.into(),
            scope: "stream:read".into(),
            role,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl_secs,
            user_metadata: None,
            app_metadata: None,
            region: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
            .expect("encode")
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::from_secret(SECRET, TokenVerifierConfig::default()).expect("verifier")
    }

    #[tokio::test]
    async fn valid_token_verifies_once() {
        let v = verifier();
        let token = make_token("t1", 60, Role::Subscriber);
        let ctx = v.verify(&token, Some("t1"), TokenSource::Header, "sse").await.expect("verify");
        assert_eq!(ctx.sub, "user-1");
    }

    #[tokio::test]
    async fn replayed_token_is_rejected_on_second_use() {
        let v = verifier();
        let token = make_token("t1", 60, Role::Subscriber);
        v.verify(&token, Some("t1"), TokenSource::Header, "sse").await.expect("first use");
        let second = v.verify(&token, Some("t1"), TokenSource::Header, "sse").await;
        assert!(matches!(second, Err(Error::ReplayAttempted(_))));
    }

    #[tokio::test]
    async fn query_token_exceeding_ttl_bound_is_rejected() {
        let v = verifier();
        let token = make_token("t1", MAX_QUERY_TOKEN_TTL_SECS + 1, Role::Subscriber);
        let result = v.verify(&token, Some("t1"), TokenSource::Query, "sse").await;
        assert!(matches!(result, Err(Error::QueryTtlExceeded { .. })));
    }

    #[tokio::test]
    async fn header_token_is_exempt_from_query_ttl_bound() {
        let v = verifier();
        let token = make_token("t1", MAX_QUERY_TOKEN_TTL_SECS + 1, Role::Subscriber);
        let result = v.verify(&token, Some("t1"), TokenSource::Header, "sse").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wrong_topic_scope_is_rejected() {
        let v = verifier();
        let token = make_token("t1", 60, Role::Subscriber);
        let result = v.verify(&token, Some("t2"), TokenSource::Header, "sse").await;
        assert!(matches!(result, Err(Error::Authorization(_))));
    }

    #[tokio::test]
    async fn debug_capability_check_rejects_subscriber() {
        let v = verifier();
        let token = make_token("t1", 60, Role::Subscriber);
        let result = v
            .verify_access(&token, Some("t1"), TokenSource::Header, "debug", crate::claims::Role::can_debug)
            .await;
        assert!(matches!(result, Err(Error::Authorization(_))));
    }

    #[tokio::test]
    async fn debug_capability_check_admits_admin() {
        let v = verifier();
        let token = make_token("t1", 60, Role::Admin);
        let result = v
            .verify_access(&token, Some("t1"), TokenSource::Header, "debug", crate::claims::Role::can_debug)
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn short_secret_is_rejected_at_construction() {
        let result = TokenVerifier::from_secret("too-short", TokenVerifierConfig::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_resolved_from_nested_app_metadata_when_tid_empty() {
        let v = verifier();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: "issuer".into(),
            aud: "stream".into(),
            sub: "user-1".into(),
            tid: String::new(),
            topic: "t1".into(),
            scope: "stream:read".into(),
            role: Role::Subscriber,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 60,
            user_metadata: None,
            app_metadata: Some(serde_json::json!({"tenant_id": "tenant-nested"})),
            region: None,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
            .expect("encode");
        let ctx = v.verify(&token, Some("t1"), TokenSource::Header, "sse").await.expect("verify");
        assert_eq!(ctx.tid, "tenant-nested");
    }

    #[tokio::test]
    async fn tenant_missing_when_tid_and_nested_claims_all_absent() {
        let v = verifier();
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: "issuer".into(),
            aud: "stream".into(),
            sub: "user-1".into(),
            tid: String::new(),
            topic: "t1".into(),
            scope: "stream:read".into(),
            role: Role::Subscriber,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + 60,
            user_metadata: None,
            app_metadata: None,
            region: None,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
            .expect("encode");
        let result = v.verify(&token, Some("t1"), TokenSource::Header, "sse").await;
        assert!(matches!(result, Err(Error::TenantMissing)));
    }
}
