//! # streamcore
//!
//! The streaming core underneath the SSE/WebSocket delivery endpoints:
//! topic-based pub/sub with backpressured subscriber queues, a Redis-backed
//! (or in-memory) resume buffer with monotonic per-topic sequencing, and
//! per-tenant rate limiting. The calculation engine that actually produces
//! updates is an external collaborator — this crate only knows about
//! `Broker::publish(topic, payload)`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamcore::{Broker, Sequencer, resume_store::InMemoryResumeStore, resume_store::ResumeStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let resume_store: Arc<dyn ResumeStore> = Arc::new(InMemoryResumeStore::new(1000));
//!     let broker = Broker::new(Sequencer::local(), resume_store);
//!
//!     let mut sub = broker.subscribe("kp.v1.moon.chain").await;
//!     broker.publish("kp.v1.moon.chain", serde_json::json!({"lon": 12.3}), "update").await.unwrap();
//!     let envelope = sub.next_message(15).await;
//!     assert_eq!(envelope.seq, 1);
//! }
//! ```

/// In-process topic registry, envelope assembly, and backpressured fan-out.
pub mod broker;
/// The `Envelope` data model shared by publish, resume, and delivery.
pub mod envelope;
/// Centralized environment variable names and typed accessors.
pub mod env_vars;
/// Crate-wide error types.
pub mod errors;
/// Metrics seam with a no-op default implementation.
pub mod metrics;
/// Per-tenant admission control (connection cap + QPS token bucket).
pub mod rate_limiter;
/// Resume-store backends (Redis sorted set, in-memory ring).
pub mod resume_store;
/// Monotonic per-topic sequence number issuance.
pub mod sequencer;

pub use broker::{Broker, BrokerStats, QueueHandle, SubscriptionId};
pub use envelope::{Envelope, CURRENT_ENVELOPE_VERSION, HEARTBEAT_TOPIC, MAX_PAYLOAD_BYTES};
pub use errors::{BackendError, BackendResult, Error, Result};
pub use metrics::{Metrics, NoopMetrics, PrometheusMetrics};
pub use rate_limiter::{LimitKind, RateLimit, RateLimitSnapshot, RateLimiter};
pub use sequencer::Sequencer;
