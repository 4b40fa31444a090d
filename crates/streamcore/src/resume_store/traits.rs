//! Abstract resume-store trait, letting the broker swap between a Redis-backed
//! store and a pure in-memory ring without caring which is active.

use async_trait::async_trait;

use crate::errors::BackendResult;

/// Occupancy statistics for a single topic's resume window, used by
/// endpoints to detect buffer exhaustion (§ stats/replay_since).
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeStats {
    pub size: u64,
    pub min_seq: Option<u64>,
    pub max_seq: Option<u64>,
}

/// Persists a short trailing window of envelopes per topic so reconnecting
/// clients can replay what they missed.
#[async_trait]
pub trait ResumeStore: Send + Sync {
    /// Appends `envelope_json` under `topic` scored by `seq`, trimming the
    /// window to the configured cap and refreshing its TTL.
    async fn store(&self, topic: &str, seq: u64, envelope_json: &str) -> BackendResult<()>;

    /// Returns envelopes with `seq` strictly greater than `last_seq`, in
    /// ascending order, up to `limit` entries.
    async fn replay_since(&self, topic: &str, last_seq: u64, limit: usize) -> BackendResult<Vec<String>>;

    /// Cardinality and min/max sequence currently retained for `topic`.
    async fn stats(&self, topic: &str) -> BackendResult<ResumeStats>;
}
