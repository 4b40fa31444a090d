//! In-process topic registry, envelope assembly, and backpressured fan-out.
//!
//! Subscriber queues are bounded MPSC channels: the broker is the sole
//! writer, the subscribing endpoint is the sole reader. Overflow uses a
//! drop-oldest policy so one slow subscriber never grows memory unboundedly
//! and never blocks delivery to everyone else.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Notify, RwLock};
use tracing::warn;

use crate::envelope::{Envelope, HEARTBEAT_TOPIC};
use crate::env_vars::{DEFAULT_HEARTBEAT_SECS, DEFAULT_MAX_QUEUE, DEFAULT_REPLAY_LIMIT, DEFAULT_RING_CAPACITY};
use crate::errors::{Error, Result};
use crate::metrics::{Metrics, NoopMetrics};
use crate::resume_store::{InMemoryResumeStore, ResumeStore};
use crate::sequencer::Sequencer;

/// A handle identifying one subscriber's registration under a topic; opaque
/// to callers beyond equality, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A bounded drop-oldest queue shared between the broker (writer) and the
/// subscribing endpoint (reader). Both ends reach the same `VecDeque`, so
/// overflow can actually evict the head — an `mpsc` channel can't, since
/// only its `Receiver` half can pop.
struct SubscriberQueue {
    buffer: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    capacity: usize,
}

struct Subscription {
    id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
}

#[derive(Default)]
struct TopicEntry {
    subscribers: Vec<Subscription>,
}

/// A non-owning read handle over one subscriber queue, returned by
/// `subscribe`. The broker retains the paired queue handle; dropping this
/// handle without calling `unsubscribe` leaks the broker-side registration
/// until process shutdown, so endpoints must always unsubscribe on teardown.
pub struct QueueHandle {
    pub(crate) topic: String,
    pub(crate) id: SubscriptionId,
    queue: Arc<SubscriberQueue>,
}

impl QueueHandle {
    /// Topic this handle is subscribed to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Awaits the next envelope, or synthesizes an idle heartbeat if none
    /// arrives within `heartbeat_secs`.
    pub async fn next_message(&mut self, heartbeat_secs: u64) -> Envelope {
        loop {
            if let Some(env) = self.queue.buffer.lock().expect("queue mutex poisoned").pop_front() {
                return env;
            }
            let notified = self.queue.notify.notified();
            if let Some(env) = self.queue.buffer.lock().expect("queue mutex poisoned").pop_front() {
                return env;
            }
            match tokio::time::timeout(Duration::from_secs(heartbeat_secs), notified).await {
                Ok(()) => continue,
                Err(_elapsed) => return Envelope::heartbeat(),
            }
        }
    }
}

/// Broker-wide counters, exposed via the debug/stats endpoint.
#[derive(Debug, Default)]
pub struct BrokerStats {
    pub published: u64,
    pub dropped: u64,
    pub subscribers: usize,
    pub topics: HashMap<String, usize>,
}

struct Counters {
    published: AtomicU64,
    dropped: AtomicU64,
}

/// The Topic Broker: subscriber registry, sequencing, resume-store mirror,
/// and drop-oldest fan-out.
pub struct Broker {
    topics: RwLock<HashMap<String, TopicEntry>>,
    sequencer: Sequencer,
    resume_store: Arc<dyn ResumeStore>,
    memory_mirror: Arc<InMemoryResumeStore>,
    counters: Counters,
    next_sub_id: AtomicU64,
    max_queue: usize,
    metrics: Arc<dyn Metrics>,
}

impl Broker {
    /// Builds a broker over an already-constructed resume store (Redis or
    /// in-memory) and sequencer; the broker additionally keeps its own
    /// in-memory ring mirror regardless of which store is primary, so a
    /// Redis outage degrades replay rather than losing it outright.
    ///
    /// Metrics default to a no-op implementation; call [`Self::with_metrics`]
    /// to wire in a real one.
    #[must_use]
    pub fn new(sequencer: Sequencer, resume_store: Arc<dyn ResumeStore>) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            sequencer,
            resume_store,
            memory_mirror: Arc::new(InMemoryResumeStore::new(DEFAULT_RING_CAPACITY)),
            counters: Counters {
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
            next_sub_id: AtomicU64::new(1),
            max_queue: DEFAULT_MAX_QUEUE,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Swaps in a real metrics implementation (e.g. `PrometheusMetrics`).
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The metrics sink this broker reports to, for callers (e.g. the SSE
    /// endpoint) that need to record events the broker itself doesn't see,
    /// like resume outcomes.
    #[must_use]
    pub fn metrics(&self) -> &Arc<dyn Metrics> {
        &self.metrics
    }

    /// Registers a new subscriber queue under `topic`.
    pub async fn subscribe(&self, topic: &str) -> QueueHandle {
        self.subscribe_with_capacity(topic, self.max_queue).await
    }

    /// As [`Self::subscribe`], with an explicit queue capacity.
    pub async fn subscribe_with_capacity(&self, topic: &str, capacity: usize) -> QueueHandle {
        let queue = Arc::new(SubscriberQueue {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
        });
        let id = SubscriptionId(self.next_sub_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push(Subscription { id, queue: queue.clone() });
        self.metrics.set_subscribers(topics.values().map(|e| e.subscribers.len()).sum());
        QueueHandle {
            topic: topic.to_string(),
            id,
            queue,
        }
    }

    /// Removes the subscription identified by `handle`, garbage-collecting
    /// the topic entry if it becomes empty. The handle's receiver is
    /// dropped with it, so any buffered envelopes are discarded.
    pub async fn unsubscribe(&self, handle: QueueHandle) {
        let mut topics = self.topics.write().await;
        if let Some(entry) = topics.get_mut(&handle.topic) {
            entry.subscribers.retain(|s| s.id != handle.id);
            if entry.subscribers.is_empty() {
                topics.remove(&handle.topic);
            }
        }
        self.metrics.set_subscribers(topics.values().map(|e| e.subscribers.len()).sum());
    }

    /// Publishes `payload` to `topic`, assigning the next sequence number,
    /// mirroring to both resume stores, and fanning out to subscribers.
    pub async fn publish(&self, topic: &str, payload: Value, event: &str) -> Result<Envelope> {
        let serialized_len = serde_json::to_vec(&payload).map(|v| v.len()).unwrap_or(0);
        if serialized_len > crate::envelope::MAX_PAYLOAD_BYTES {
            return Err(Error::PayloadTooLarge(serialized_len));
        }

        let seq = self.sequencer.next_seq(topic).await;
        let envelope = Envelope::new(topic, event, seq, payload);
        let json = envelope
            .to_json()
            .map_err(|e| Error::InvalidEnvelope(e.to_string()))?;

        if let Err(e) = self.memory_mirror.store(topic, seq, &json).await {
            warn!(topic, error = %e, "in-memory resume mirror write failed");
        }
        if let Err(e) = self.resume_store.store(topic, seq, &json).await {
            warn!(topic, error = %e, "resume store write failed, relying on in-memory mirror");
        }

        self.fan_out(topic, &envelope).await;
        Ok(envelope)
    }

    /// Publishes a heartbeat event for `topic` (distinct from the idle
    /// heartbeats `QueueHandle::next_message` synthesizes locally).
    pub async fn heartbeat(&self, topic: &str) -> Result<Envelope> {
        self.publish(topic, serde_json::json!({}), "heartbeat").await
    }

    async fn fan_out(&self, topic: &str, envelope: &Envelope) {
        let topics = self.topics.read().await;
        let Some(entry) = topics.get(topic) else {
            return;
        };
        let mut dropped = 0u64;
        for sub in &entry.subscribers {
            let mut buf = sub.queue.buffer.lock().expect("queue mutex poisoned");
            if buf.len() >= sub.queue.capacity {
                buf.pop_front();
                dropped += 1;
            }
            buf.push_back(envelope.clone());
            drop(buf);
            sub.queue.notify.notify_one();
        }
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_published(topic);
        if dropped > 0 {
            self.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
            self.metrics.record_dropped(topic, dropped);
        }
    }

    /// Replays envelopes for `topic` with `seq > last_seq`, or reports
    /// [`Error::BufferExhausted`] if `last_seq` predates the resume window
    /// and a partial replay would silently skip envelopes.
    pub async fn replay_since_or_exhausted(&self, topic: &str, last_seq: u64) -> Result<Vec<String>> {
        let stats = self.resume_stats(topic).await;
        let exhausted = match stats.min_seq {
            Some(min_seq) if min_seq > 0 => last_seq < min_seq.saturating_sub(1),
            _ => false,
        };
        if exhausted {
            return Err(Error::BufferExhausted {
                requested: last_seq,
                window_start: stats.min_seq.unwrap_or(0),
            });
        }
        Ok(self.replay_since(topic, last_seq).await)
    }

    /// Replays envelopes for `topic` with `seq > last_seq`, preferring the
    /// durable resume store and falling back to the in-memory mirror.
    pub async fn replay_since(&self, topic: &str, last_seq: u64) -> Vec<String> {
        match self.resume_store.replay_since(topic, last_seq, DEFAULT_REPLAY_LIMIT).await {
            Ok(items) if !items.is_empty() => return items,
            Ok(_) => {}
            Err(e) => warn!(topic, error = %e, "resume store replay failed, falling back to memory mirror"),
        }
        self.memory_mirror
            .replay_since(topic, last_seq, DEFAULT_REPLAY_LIMIT)
            .await
            .unwrap_or_default()
    }

    /// Occupancy stats for `topic`'s resume window (prefers the durable
    /// store; falls back to the memory mirror on error).
    pub async fn resume_stats(&self, topic: &str) -> crate::resume_store::ResumeStats {
        match self.resume_store.stats(topic).await {
            Ok(stats) if stats.size > 0 => return stats,
            Ok(_) => {}
            Err(e) => warn!(topic, error = %e, "resume store stats failed, falling back to memory mirror"),
        }
        self.memory_mirror
            .stats(topic)
            .await
            .unwrap_or_default()
    }

    /// Broker-wide counters and per-topic subscriber counts.
    pub async fn stats(&self) -> BrokerStats {
        let topics = self.topics.read().await;
        let mut per_topic = HashMap::with_capacity(topics.len());
        let mut subscribers = 0;
        for (topic, entry) in topics.iter() {
            per_topic.insert(topic.clone(), entry.subscribers.len());
            subscribers += entry.subscribers.len();
        }
        BrokerStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            subscribers,
            topics: per_topic,
        }
    }
}

/// Default idle-heartbeat interval used by endpoints that don't override it.
#[must_use]
pub fn default_heartbeat_secs() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_broker() -> Broker {
        let resume_store: Arc<dyn ResumeStore> = Arc::new(InMemoryResumeStore::new(DEFAULT_RING_CAPACITY));
        Broker::new(Sequencer::local(), resume_store)
    }

    #[tokio::test]
    async fn publish_assigns_monotonic_sequence() {
        let broker = test_broker();
        let e1 = broker.publish("t1", serde_json::json!({"x": 1}), "update").await.expect("publish");
        let e2 = broker.publish("t1", serde_json::json!({"x": 2}), "update").await.expect("publish");
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[tokio::test]
    async fn subscriber_receives_published_envelope_in_order() {
        let broker = test_broker();
        let mut handle = broker.subscribe("t1").await;
        broker.publish("t1", serde_json::json!({"n": 1}), "update").await.expect("publish");
        broker.publish("t1", serde_json::json!({"n": 2}), "update").await.expect("publish");

        let first = handle.next_message(1).await;
        let second = handle.next_message(1).await;
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn idle_subscriber_gets_synthetic_heartbeat() {
        let broker = test_broker();
        let mut handle = broker.subscribe("quiet-topic").await;
        let env = handle.next_message(1).await;
        assert_eq!(env.topic, HEARTBEAT_TOPIC);
        assert_eq!(env.seq, 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_empty_topic_entry() {
        let broker = test_broker();
        let handle = broker.subscribe("t1").await;
        assert_eq!(broker.stats().await.subscribers, 1);
        broker.unsubscribe(handle).await;
        let stats = broker.stats().await;
        assert_eq!(stats.subscribers, 0);
        assert!(!stats.topics.contains_key("t1"));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_without_failing_publish() {
        let broker = test_broker();
        let mut handle = broker.subscribe_with_capacity("t1", 2).await;
        for n in 1..=5u64 {
            broker
                .publish("t1", serde_json::json!({"n": n}), "update")
                .await
                .expect("publish must never fail due to backpressure");
        }
        let stats = broker.stats().await;
        assert!(stats.dropped >= 3, "expected at least 3 drops, got {}", stats.dropped);

        // The 2 newest envelopes should still be waiting in the queue.
        let first = handle.next_message(1).await;
        assert_eq!(first.seq, 4);
    }

    #[tokio::test]
    async fn replay_since_returns_newer_envelopes_only() {
        let broker = test_broker();
        for n in 1..=5u64 {
            broker.publish("t1", serde_json::json!({"n": n}), "update").await.expect("publish");
        }
        let replayed = broker.replay_since("t1", 2).await;
        assert_eq!(replayed.len(), 3);
    }

    #[tokio::test]
    async fn replay_since_or_exhausted_errors_when_last_seq_predates_window() {
        let resume_store: Arc<dyn ResumeStore> = Arc::new(InMemoryResumeStore::new(3));
        let broker = Broker::new(Sequencer::local(), resume_store);
        for n in 1..=5u64 {
            broker.publish("t1", serde_json::json!({"n": n}), "update").await.expect("publish");
        }
        let result = broker.replay_since_or_exhausted("t1", 1).await;
        assert!(matches!(result, Err(Error::BufferExhausted { .. })));
    }

    #[tokio::test]
    async fn replay_since_or_exhausted_replays_when_within_window() {
        let broker = test_broker();
        for n in 1..=5u64 {
            broker.publish("t1", serde_json::json!({"n": n}), "update").await.expect("publish");
        }
        let result = broker.replay_since_or_exhausted("t1", 2).await.expect("within window");
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let broker = test_broker();
        let huge = "x".repeat(crate::envelope::MAX_PAYLOAD_BYTES + 1);
        let result = broker.publish("t1", serde_json::json!({"blob": huge}), "update").await;
        assert!(matches!(result, Err(Error::PayloadTooLarge(_))));
    }
}
