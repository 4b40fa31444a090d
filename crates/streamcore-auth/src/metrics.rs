//! Auth-event counters, registered directly with the process-wide default
//! registry. This crate has no dependency on `streamcore`'s `Metrics` trait
//! (the two crates are siblings under `streamcore-server`), so these are
//! standalone series rather than implementations of that trait.

use std::sync::LazyLock;

use prometheus::{CounterVec, Opts};
use tracing::warn;

static AUTH_VALIDATED: LazyLock<CounterVec> = LazyLock::new(|| {
    let metric = CounterVec::new(
        Opts::new("stream_auth_validated_total", "Total tokens that passed verification"),
        &["endpoint"],
    )
    .expect("metric options are valid");
    if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
        warn!(error = %e, "failed to register stream_auth_validated_total, continuing unregistered");
    }
    metric
});

static AUTH_REPLAY_ATTEMPTED: LazyLock<CounterVec> = LazyLock::new(|| {
    let metric = CounterVec::new(
        Opts::new("stream_auth_replay_attempted_total", "Total tokens rejected as already-used (jti replay)"),
        &["endpoint"],
    )
    .expect("metric options are valid");
    if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
        warn!(error = %e, "failed to register stream_auth_replay_attempted_total, continuing unregistered");
    }
    metric
});

pub(crate) fn record_validated(endpoint: &str) {
    AUTH_VALIDATED.with_label_values(&[endpoint]).inc();
}

pub(crate) fn record_replay_attempted(endpoint: &str) {
    AUTH_REPLAY_ATTEMPTED.with_label_values(&[endpoint]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_without_panicking() {
        record_validated("sse");
        record_replay_attempted("sse");
        assert!(AUTH_VALIDATED.with_label_values(&["sse"]).get() >= 1.0);
        assert!(AUTH_REPLAY_ATTEMPTED.with_label_values(&["sse"]).get() >= 1.0);
    }
}
