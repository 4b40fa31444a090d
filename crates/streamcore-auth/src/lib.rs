//! Short-TTL bearer token verification, single-use enforcement, and audit
//! logging for the stream endpoints.

pub mod audit;
pub mod claims;
pub mod error;
pub mod jti_store;
pub mod jwks;
mod metrics;
pub mod verifier;

pub use audit::{AuditEventType, AuditRecord, AuditSink, NoopAuditSink, RequestContext, TracingAuditSink};
pub use claims::{Claims, Role};
pub use error::{Error, Result};
pub use jti_store::{jti_ttl_secs, InMemoryJtiStore, JtiStore, RedisJtiStore, MIN_JTI_TTL_SECS};
pub use jwks::fetch_decoding_key;
pub use verifier::{AuthContext, TokenSource, TokenVerifier, TokenVerifierConfig, MAX_QUERY_TOKEN_TTL_SECS};
