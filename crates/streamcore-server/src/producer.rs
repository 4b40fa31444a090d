//! Optional background producer loop for a single well-known topic. The
//! astronomical engine that normally drives updates lives outside this
//! crate; this loop exists so the streaming core can demonstrate and
//! exercise its own invariants (monotonic seq, resume replay, backpressure)
//! without an external publisher wired up.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tracing::{error, info, instrument};

use streamcore::Broker;

const MAX_BACKOFF: Duration = Duration::from_secs(10);
const JITTER_MS: i64 = 250;

/// Runs until `shutdown` resolves. Ticks at `interval_ms` (± jitter),
/// publishing a payload carrying a producer-local sequence number used
/// only for consumer-side deduplication within this producer instance —
/// it is never confused with the broker's own topic sequence.
#[instrument(skip(broker, shutdown), fields(%topic))]
pub async fn run(
    broker: std::sync::Arc<Broker>,
    topic: String,
    interval_ms: u64,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut producer_seq: u64 = 0;
    let mut backoff = Duration::from_millis(interval_ms);

    info!(interval_ms, "producer loop started");

    loop {
        let jitter = rand::thread_rng().gen_range(-JITTER_MS..=JITTER_MS);
        let base = Duration::from_millis(interval_ms);
        let delay = if jitter >= 0 {
            base.saturating_add(Duration::from_millis(jitter as u64))
        } else {
            base.saturating_sub(Duration::from_millis((-jitter) as u64))
        };

        tokio::select! {
            _ = &mut shutdown => {
                info!("producer loop cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        producer_seq += 1;
        let payload = json!({
            "producer_seq": producer_seq,
            "ts": chrono::Utc::now().to_rfc3339(),
        });

        match broker.publish(&topic, payload, "update").await {
            Ok(_) => {
                backoff = Duration::from_millis(interval_ms);
            }
            Err(e) => {
                error!(error = %e, producer_seq, "producer publish failed, backing off");
                tokio::select! {
                    _ = &mut shutdown => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}
