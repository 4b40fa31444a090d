//! End-to-end coverage across the broker, sequencer, and resume store
//! together, as opposed to each module's colocated unit tests which stub
//! or isolate their neighbors.

use std::sync::Arc;

use streamcore::resume_store::InMemoryResumeStore;
use streamcore::{Broker, Sequencer};

fn broker(capacity: usize) -> Broker {
    Broker::new(Sequencer::local(), Arc::new(InMemoryResumeStore::new(capacity)))
}

#[tokio::test]
async fn subscriber_receives_published_envelope_with_monotonic_seq() {
    let broker = broker(100);
    let mut sub = broker.subscribe("kp.v1.moon.chain").await;

    broker
        .publish("kp.v1.moon.chain", serde_json::json!({"lon": 1.0}), "update")
        .await
        .expect("publish");
    broker
        .publish("kp.v1.moon.chain", serde_json::json!({"lon": 2.0}), "update")
        .await
        .expect("publish");

    let first = sub.next_message(15).await;
    let second = sub.next_message(15).await;
    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
}

#[tokio::test]
async fn late_subscriber_replays_from_resume_store() {
    let broker = broker(100);

    broker.publish("kp.v1.moon.chain", serde_json::json!({"lon": 1.0}), "update").await.unwrap();
    broker.publish("kp.v1.moon.chain", serde_json::json!({"lon": 2.0}), "update").await.unwrap();
    broker.publish("kp.v1.moon.chain", serde_json::json!({"lon": 3.0}), "update").await.unwrap();

    let replayed = broker.replay_since("kp.v1.moon.chain", 1).await;
    assert_eq!(replayed.len(), 2, "expected envelopes with seq 2 and 3");
}

#[tokio::test]
async fn independent_topics_have_independent_sequences_and_subscriber_sets() {
    let broker = broker(100);
    let mut sub_a = broker.subscribe("topic.a").await;
    let mut sub_b = broker.subscribe("topic.b").await;

    broker.publish("topic.a", serde_json::json!({"v": 1}), "update").await.unwrap();
    broker.publish("topic.b", serde_json::json!({"v": 1}), "update").await.unwrap();
    broker.publish("topic.a", serde_json::json!({"v": 2}), "update").await.unwrap();

    let a1 = sub_a.next_message(15).await;
    let a2 = sub_a.next_message(15).await;
    let b1 = sub_b.next_message(15).await;
    assert_eq!((a1.seq, a2.seq), (1, 2));
    assert_eq!(b1.seq, 1);

    let stats = broker.stats().await;
    assert_eq!(stats.subscribers, 2);
    assert_eq!(stats.topics.get("topic.a").copied(), Some(1));
    assert_eq!(stats.topics.get("topic.b").copied(), Some(1));
}

#[tokio::test]
async fn unsubscribe_removes_topic_entry_once_last_subscriber_leaves() {
    let broker = broker(100);
    let handle = broker.subscribe("topic.solo").await;
    assert_eq!(broker.stats().await.subscribers, 1);

    broker.unsubscribe(handle).await;
    assert_eq!(broker.stats().await.subscribers, 0);
}

#[tokio::test]
async fn resume_stats_reports_min_and_max_seq_for_topic() {
    let broker = broker(100);
    broker.publish("kp.v1.moon.chain", serde_json::json!({"v": 1}), "update").await.unwrap();
    broker.publish("kp.v1.moon.chain", serde_json::json!({"v": 2}), "update").await.unwrap();

    let stats = broker.resume_stats("kp.v1.moon.chain").await;
    assert_eq!(stats.min_seq, Some(1));
    assert_eq!(stats.max_seq, Some(2));
    assert_eq!(stats.size, 2);
}
