//! Redis-backed resume store: a sorted set per topic, scored by `seq`,
//! trimmed to a configured cap and TTL-refreshed on every write.
//!
//! Key naming mirrors the wire format documented for the core: sorted set
//! at `<prefix><topic>`, members are envelope JSON strings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Semaphore;

use crate::errors::{BackendError, BackendResult};

use super::traits::{ResumeStats, ResumeStore};

/// Caps the number of resume-store writes in flight at once, so a burst of
/// publishes cannot open unbounded concurrent connections against Redis.
const DEFAULT_MAX_CONCURRENT_WRITES: usize = 100;

/// Characters considered safe to embed directly in a Redis key. Topic
/// names outside this set are base64-encoded to avoid key-injection or
/// encoding surprises.
fn is_safe_key_segment(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 200
        && value
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.'))
}

fn sanitize_topic_for_key(topic: &str) -> String {
    if is_safe_key_segment(topic) {
        topic.to_string()
    } else {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        format!("b64_{}", URL_SAFE_NO_PAD.encode(topic.as_bytes()))
    }
}

pub struct RedisResumeStore {
    conn: redis::aio::ConnectionManager,
    key_prefix: String,
    max_items: u64,
    ttl_secs: u64,
    write_semaphore: Semaphore,
    writes: AtomicU64,
    write_errors: AtomicU64,
}

impl RedisResumeStore {
    /// Connects to `redis_url` and wraps it in an auto-reconnecting
    /// connection manager, matching the distributed rate limiter's
    /// connection-handling idiom.
    ///
    /// # Errors
    /// Returns a [`BackendError::Redis`] if the connection cannot be
    /// established.
    pub async fn connect(
        redis_url: &str,
        key_prefix: impl Into<String>,
        max_items: u64,
        ttl_secs: u64,
    ) -> BackendResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key_prefix: key_prefix.into(),
            max_items,
            ttl_secs,
            write_semaphore: Semaphore::new(DEFAULT_MAX_CONCURRENT_WRITES),
            writes: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        })
    }

    fn key(&self, topic: &str) -> String {
        format!("{}{}", self.key_prefix, sanitize_topic_for_key(topic))
    }

    /// Total successful writes since this store was created.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total failed writes since this store was created.
    pub fn write_error_count(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResumeStore for RedisResumeStore {
    async fn store(&self, topic: &str, seq: u64, envelope_json: &str) -> BackendResult<()> {
        let Ok(_permit) = self.write_semaphore.try_acquire() else {
            // Under extreme burst, drop this write rather than block the
            // publisher; the in-memory ring mirrored by the broker still
            // has the envelope.
            return Err(BackendError::Unavailable("resume-store write semaphore exhausted".into()));
        };

        let key = self.key(topic);
        let mut conn = self.conn.clone();
        let result = tokio::time::timeout(REDIS_OP_TIMEOUT, async {
            let _: () = conn.zadd(&key, envelope_json, seq as f64).await?;
            let card: u64 = conn.zcard(&key).await?;
            if card > self.max_items {
                let excess = card - self.max_items;
                let _: () = conn.zremrangebyrank(&key, 0, excess as isize - 1).await?;
            }
            let _: () = conn.expire(&key, self.ttl_secs as i64).await?;
            Ok::<(), redis::RedisError>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                Err(BackendError::Redis(e))
            }
            Err(_elapsed) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                Err(BackendError::Timeout)
            }
        }
    }

    async fn replay_since(&self, topic: &str, last_seq: u64, limit: usize) -> BackendResult<Vec<String>> {
        let key = self.key(topic);
        let mut conn = self.conn.clone();
        // `(last_seq` excludes last_seq itself; `+inf` covers all newer entries.
        let members: Vec<String> = tokio::time::timeout(
            REDIS_OP_TIMEOUT,
            conn.zrangebyscore_limit(&key, format!("({last_seq}"), "+inf", 0, limit as isize),
        )
        .await
        .map_err(|_elapsed| BackendError::Timeout)??;
        Ok(members)
    }

    async fn stats(&self, topic: &str) -> BackendResult<ResumeStats> {
        let key = self.key(topic);
        let mut conn = self.conn.clone();
        let size: u64 = tokio::time::timeout(REDIS_OP_TIMEOUT, conn.zcard(&key))
            .await
            .map_err(|_elapsed| BackendError::Timeout)??;
        if size == 0 {
            return Ok(ResumeStats::default());
        }
        let lowest: Vec<(String, f64)> = tokio::time::timeout(REDIS_OP_TIMEOUT, conn.zrange_withscores(&key, 0, 0))
            .await
            .map_err(|_elapsed| BackendError::Timeout)??;
        let highest: Vec<(String, f64)> = tokio::time::timeout(REDIS_OP_TIMEOUT, conn.zrevrange_withscores(&key, 0, 0))
            .await
            .map_err(|_elapsed| BackendError::Timeout)??;
        Ok(ResumeStats {
            size,
            min_seq: lowest.first().map(|(_, score)| *score as u64),
            max_seq: highest.first().map(|(_, score)| *score as u64),
        })
    }
}

/// Bare timeout applied to every Redis round trip initiated by the resume
/// store, mirrored on the sequencer's `INCR` call.
const REDIS_OP_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_topic_passes_through() {
        assert_eq!(sanitize_topic_for_key("kp.v1.moon.chain"), "kp.v1.moon.chain");
    }

    #[test]
    fn unsafe_topic_is_base64_encoded() {
        let key = sanitize_topic_for_key("topic with spaces/slash");
        assert!(key.starts_with("b64_"));
    }
}
