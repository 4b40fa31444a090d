//! The `Envelope` is the single unit of publication and delivery, carried
//! identically by SSE framing, WebSocket text frames, and the resume store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic carrying synthetic idle heartbeats, as distinct from any
/// subscriber-visible topic.
pub const HEARTBEAT_TOPIC: &str = "_hb";

/// Current envelope schema version.
pub const CURRENT_ENVELOPE_VERSION: u32 = 1;

/// Maximum serialized payload size accepted by `Broker::publish` (64 KiB).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// A single published update, or a synthetic heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Schema version of this envelope.
    pub v: u32,
    /// RFC3339 UTC timestamp at publish time.
    pub ts: String,
    /// Monotonic per-topic sequence number assigned by the `Sequencer`.
    pub seq: u64,
    /// Topic this envelope belongs to.
    pub topic: String,
    /// Event kind: `"update"`, `"heartbeat"`, `"error"`, `"reset"`, ...
    pub event: String,
    /// Opaque application payload.
    pub payload: Value,
}

impl Envelope {
    /// Builds an envelope stamped with the current time, ready for
    /// publication. `seq` must already have been obtained from the
    /// `Sequencer` for the target topic.
    #[must_use]
    pub fn new(topic: impl Into<String>, event: impl Into<String>, seq: u64, payload: Value) -> Self {
        Self {
            v: CURRENT_ENVELOPE_VERSION,
            ts: chrono::Utc::now().to_rfc3339(),
            seq,
            topic: topic.into(),
            event: event.into(),
            payload,
        }
    }

    /// Builds a synthetic idle heartbeat, not tied to any subscriber's topic.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self {
            v: CURRENT_ENVELOPE_VERSION,
            ts: chrono::Utc::now().to_rfc3339(),
            seq: 0,
            topic: HEARTBEAT_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({ "kind": "idle" }),
        }
    }

    /// Serializes this envelope to its canonical JSON wire form.
    ///
    /// # Errors
    /// Returns an error only if the payload contains non-serializable data,
    /// which should not happen for a `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses an envelope from its canonical JSON wire form.
    ///
    /// # Errors
    /// Returns an error if `raw` is not a valid envelope document.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let env = Envelope::new("kp.v1.moon.chain", "update", 7, serde_json::json!({"x": 1}));
        let raw = env.to_json().expect("serializes");
        let back = Envelope::from_json(&raw).expect("parses");
        assert_eq!(env, back);
    }

    #[test]
    fn heartbeat_uses_synthetic_topic_and_zero_seq() {
        let hb = Envelope::heartbeat();
        assert_eq!(hb.topic, HEARTBEAT_TOPIC);
        assert_eq!(hb.seq, 0);
        assert_eq!(hb.event, "heartbeat");
    }
}
