//! Metrics seam: the core never forces a global Prometheus registry on its
//! callers. A no-op implementation is the default; [`PrometheusMetrics`] is
//! the real implementation the server binary wires into the [`Broker`](crate::Broker).

use std::sync::LazyLock;

use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts};
use tracing::warn;

/// Observability hook for broker/rate-limiter/resume-store events.
/// Implementations must be cheap to call on the hot path (fan-out, bucket
/// consumption) — no blocking I/O.
pub trait Metrics: Send + Sync {
    fn record_published(&self, _topic: &str) {}
    fn record_dropped(&self, _topic: &str, _count: u64) {}
    fn record_rate_limit_exceeded(&self, _tenant_id: &str, _kind: &str) {}
    fn record_resume_request(&self, _outcome: &str) {}
    fn set_subscribers(&self, _count: usize) {}
    fn record_redis_latency_ms(&self, _operation: &str, _millis: f64) {}
}

/// Default no-op implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

fn register<T: prometheus::core::Collector + Clone + 'static>(name: &str, metric: T) -> T {
    if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
        warn!(metric = name, error = %e, "metric registration failed, continuing unregistered");
    }
    metric
}

static PUBLISHED: LazyLock<Counter> = LazyLock::new(|| {
    register(
        "stream_published_total",
        Counter::new("stream_published_total", "Total envelopes published across all topics")
            .expect("metric options are valid"),
    )
});

static DROPPED: LazyLock<CounterVec> = LazyLock::new(|| {
    register(
        "stream_dropped_total",
        CounterVec::new(
            Opts::new("stream_dropped_total", "Total envelopes dropped by drop-oldest backpressure"),
            &["topic"],
        )
        .expect("metric options are valid"),
    )
});

static SUBSCRIBERS: LazyLock<Gauge> = LazyLock::new(|| {
    register(
        "stream_subscribers",
        Gauge::new("stream_subscribers", "Current number of live subscriber queues").expect("metric options are valid"),
    )
});

static RESUME_REQUESTS: LazyLock<CounterVec> = LazyLock::new(|| {
    register(
        "stream_resume_requests_total",
        CounterVec::new(
            Opts::new("stream_resume_requests_total", "Total Last-Event-ID resume attempts by outcome"),
            &["outcome"],
        )
        .expect("metric options are valid"),
    )
});

static REDIS_LATENCY_MS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new("stream_redis_latency_ms", "Resume-store Redis call latency, in milliseconds")
        .buckets(vec![1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]);
    register(
        "stream_redis_latency_ms",
        HistogramVec::new(opts, &["operation"]).expect("metric options are valid"),
    )
});

/// Real Prometheus-backed implementation, registered with the process-wide
/// default registry so `/stream/_metrics` (via `prometheus::gather()`)
/// actually returns these series.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetrics;

impl Metrics for PrometheusMetrics {
    fn record_published(&self, _topic: &str) {
        PUBLISHED.inc();
    }

    fn record_dropped(&self, topic: &str, count: u64) {
        DROPPED.with_label_values(&[topic]).inc_by(count as f64);
    }

    fn record_rate_limit_exceeded(&self, tenant_id: &str, kind: &str) {
        crate::rate_limiter::record_rate_limit_exceeded_metric(tenant_id, kind);
    }

    fn record_resume_request(&self, outcome: &str) {
        RESUME_REQUESTS.with_label_values(&[outcome]).inc();
    }

    fn set_subscribers(&self, count: usize) {
        SUBSCRIBERS.set(count as f64);
    }

    fn record_redis_latency_ms(&self, operation: &str, millis: f64) {
        REDIS_LATENCY_MS.with_label_values(&[operation]).observe(millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_metrics_accepts_all_calls() {
        let m = NoopMetrics;
        m.record_published("t1");
        m.record_dropped("t1", 3);
        m.record_rate_limit_exceeded("tenant", "qps");
        m.record_resume_request("replayed");
        m.set_subscribers(4);
        m.record_redis_latency_ms("incr", 1.5);
    }

    #[test]
    fn prometheus_metrics_records_without_panicking() {
        let m = PrometheusMetrics;
        m.record_published("t1");
        m.record_dropped("t1", 2);
        m.record_resume_request("replayed");
        m.set_subscribers(7);
        m.record_redis_latency_ms("incr", 3.2);
        assert!(PUBLISHED.get() >= 1.0);
        assert!(SUBSCRIBERS.get() >= 0.0);
    }
}
