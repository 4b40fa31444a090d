//! Single-use enforcement for token `jti`s. A JTI may be marked used at
//! most once; a second attempt is a detected replay.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Lower bound on the TTL applied to a JTI record, so a token with a very
/// short `exp - iat` window still gets a sane single-use enforcement period.
pub const MIN_JTI_TTL_SECS: i64 = 300;

/// Marks single-use tokens and detects replay.
#[async_trait]
pub trait JtiStore: Send + Sync {
    /// Attempts to mark `jti` used. Returns `Ok(())` on first use, and
    /// `Err(Error::ReplayAttempted)` if it was already marked.
    async fn mark_used(&self, jti: &str, ttl_secs: i64) -> Result<()>;
}

/// Computes the TTL to apply to a JTI record: `max(300, exp - iat)`.
#[must_use]
pub fn jti_ttl_secs(iat: i64, exp: i64) -> i64 {
    (exp - iat).max(MIN_JTI_TTL_SECS)
}

/// Process-local JTI store, for single-instance deployments or tests.
/// Expired entries are swept lazily on each call rather than via a
/// background task, since the registry is expected to stay small.
pub struct InMemoryJtiStore {
    used: Mutex<HashMap<String, Instant>>,
}

impl Default for InMemoryJtiStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJtiStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            used: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl JtiStore for InMemoryJtiStore {
    async fn mark_used(&self, jti: &str, ttl_secs: i64) -> Result<()> {
        let now = Instant::now();
        let mut used = self.used.lock().await;
        used.retain(|_, expires_at| *expires_at > now);
        if used.contains_key(jti) {
            return Err(Error::ReplayAttempted(jti.to_string()));
        }
        used.insert(jti.to_string(), now + Duration::from_secs(ttl_secs.max(0) as u64));
        Ok(())
    }
}

/// Redis-backed JTI store: atomic single-use via `SET key val NX EX ttl`.
pub struct RedisJtiStore {
    conn: redis::aio::ConnectionManager,
    key_prefix: String,
}

impl RedisJtiStore {
    #[must_use]
    pub fn new(conn: redis::aio::ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }
}

#[async_trait]
impl JtiStore for RedisJtiStore {
    async fn mark_used(&self, jti: &str, ttl_secs: i64) -> Result<()> {
        let key = format!("{}{}", self.key_prefix, jti);
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl_secs.max(1) as u64));
        let result: Option<String> = conn
            .set_options(&key, "used", opts)
            .await
            .map_err(|e| Error::JtiStore(e.to_string()))?;
        if result.is_none() {
            return Err(Error::ReplayAttempted(jti.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_enforces_minimum() {
        assert_eq!(jti_ttl_secs(0, 60), MIN_JTI_TTL_SECS);
        assert_eq!(jti_ttl_secs(0, 1000), 1000);
    }

    #[tokio::test]
    async fn first_use_succeeds_second_is_replay() {
        let store = InMemoryJtiStore::new();
        store.mark_used("jti-1", 60).await.expect("first use");
        let second = store.mark_used("jti-1", 60).await;
        assert!(matches!(second, Err(Error::ReplayAttempted(_))));
    }

    #[tokio::test]
    async fn distinct_jtis_are_independent() {
        let store = InMemoryJtiStore::new();
        store.mark_used("jti-a", 60).await.expect("a");
        store.mark_used("jti-b", 60).await.expect("b");
    }
}
