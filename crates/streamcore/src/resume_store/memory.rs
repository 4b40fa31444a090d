//! In-memory ring-buffer resume store. Authoritative when Redis is absent,
//! and always kept warm alongside the Redis-backed store by the broker so a
//! Redis hiccup degrades gracefully rather than losing the resume window.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::envelope::Envelope;
use crate::errors::BackendResult;

use super::traits::{ResumeStats, ResumeStore};

struct Ring {
    entries: VecDeque<(u64, String)>,
    capacity: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    fn push(&mut self, seq: u64, envelope_json: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((seq, envelope_json));
    }
}

/// Bounded in-memory ring, one per topic, created lazily on first publish.
pub struct InMemoryResumeStore {
    topics: DashMap<String, RwLock<Ring>>,
    capacity: usize,
}

impl InMemoryResumeStore {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity,
        }
    }
}

#[async_trait]
impl ResumeStore for InMemoryResumeStore {
    async fn store(&self, topic: &str, seq: u64, envelope_json: &str) -> BackendResult<()> {
        let ring = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| RwLock::new(Ring::new(self.capacity)));
        ring.write().await.push(seq, envelope_json.to_string());
        Ok(())
    }

    async fn replay_since(&self, topic: &str, last_seq: u64, limit: usize) -> BackendResult<Vec<String>> {
        let Some(ring) = self.topics.get(topic) else {
            return Ok(Vec::new());
        };
        let ring = ring.read().await;
        Ok(ring
            .entries
            .iter()
            .filter(|(seq, _)| *seq > last_seq)
            .take(limit)
            .map(|(_, json)| json.clone())
            .collect())
    }

    async fn stats(&self, topic: &str) -> BackendResult<ResumeStats> {
        let Some(ring) = self.topics.get(topic) else {
            return Ok(ResumeStats::default());
        };
        let ring = ring.read().await;
        Ok(ResumeStats {
            size: ring.entries.len() as u64,
            min_seq: ring.entries.front().map(|(s, _)| *s),
            max_seq: ring.entries.back().map(|(s, _)| *s),
        })
    }
}

/// Scans the ring directly for envelopes (used by the broker when both the
/// Redis store and its own in-memory mirror come up empty, as a last
/// resort consistency check in tests).
pub fn parse_seq(envelope_json: &str) -> Option<u64> {
    Envelope::from_json(envelope_json).ok().map(|e| e.seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_returns_only_newer_entries_in_order() {
        let store = InMemoryResumeStore::new(10);
        for seq in 1..=5u64 {
            store.store("t1", seq, &format!("{{\"seq\":{seq}}}")).await.expect("store");
        }
        let replayed = store.replay_since("t1", 2, 10).await.expect("replay");
        assert_eq!(replayed.len(), 3);
        assert!(replayed[0].contains("\"seq\":3"));
    }

    #[tokio::test]
    async fn ring_evicts_oldest_beyond_capacity() {
        let store = InMemoryResumeStore::new(3);
        for seq in 1..=5u64 {
            store.store("t1", seq, &format!("{{\"seq\":{seq}}}")).await.expect("store");
        }
        let stats = store.stats("t1").await.expect("stats");
        assert_eq!(stats.size, 3);
        assert_eq!(stats.min_seq, Some(3));
        assert_eq!(stats.max_seq, Some(5));
    }

    #[tokio::test]
    async fn unknown_topic_reports_empty_stats() {
        let store = InMemoryResumeStore::new(10);
        let stats = store.stats("never-published").await.expect("stats");
        assert_eq!(stats.size, 0);
        assert!(stats.min_seq.is_none());
    }
}
