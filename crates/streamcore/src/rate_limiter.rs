//! Per-tenant admission control: concurrent-connection caps and a QPS
//! token bucket. State is process-local by design (see module docs on
//! `streamcore::Error::RateLimited`) — counters reset across a restart,
//! which is acceptable because connections themselves are ephemeral.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::one::RefMut;
use prometheus::{CounterVec, Opts};
use tokio::sync::RwLock;

use crate::env_vars::{
    env_f64_or_default, env_u32_or_default, env_u64_or_default, DEFAULT_IDLE_TTL_SECS,
    DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_CONNECTIONS, DEFAULT_RATE_LIMIT_QPS,
    RATE_LIMITER_IDLE_TTL, STREAM_RATE_LIMIT_BURST, STREAM_RATE_LIMIT_CONNECTIONS,
    STREAM_RATE_LIMIT_QPS,
};

static RATE_LIMIT_EXCEEDED: LazyLock<CounterVec> = LazyLock::new(|| {
    let metric = CounterVec::new(
        Opts::new(
            "stream_rate_limit_exceeded_total",
            "Total admission requests rejected by the rate limiter",
        ),
        &["tenant_id", "kind"],
    )
    .expect("metric options are valid");
    if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
        tracing::warn!(error = %e, "failed to register stream_rate_limit_exceeded_total, continuing unregistered");
    }
    metric
});

/// Increments `stream_rate_limit_exceeded_total{tenant_id,kind}` directly,
/// bypassing per-tenant label bookkeeping. Used by [`crate::metrics::PrometheusMetrics`]
/// so callers going through the generic [`crate::metrics::Metrics`] trait land on the
/// same series `RateLimiter` itself writes to.
pub(crate) fn record_rate_limit_exceeded_metric(tenant_label: &str, kind: &str) {
    RATE_LIMIT_EXCEEDED.with_label_values(&[tenant_label, kind]).inc();
}

/// Maximum number of distinct tenant labels emitted to Prometheus; beyond
/// this, additional tenants are folded into the `overflow` label so a
/// misbehaving or hostile caller cannot blow up metric cardinality.
const MAX_TENANT_METRIC_LABELS: usize = 1000;
const MAX_SAFE_TENANT_LABEL_LEN: usize = 64;

fn is_safe_tenant_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SAFE_TENANT_LABEL_LEN
        && value
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.'))
}

/// Returns a metric-safe label for `tenant_id`, hashing it down to a short
/// fixed form when it contains characters or a length Prometheus would
/// otherwise choke on.
fn tenant_label_value(tenant_id: &str) -> Cow<'_, str> {
    if is_safe_tenant_label(tenant_id) {
        return Cow::Borrowed(tenant_id);
    }
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    let digest_hex = hex::encode(hasher.finalize());
    Cow::Owned(format!("tenant_{}", &digest_hex[..12]))
}

/// The two admission kinds the rate limiter enforces, also used as the
/// discriminant for the public [`crate::Error::RateLimited`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Rejected because the tenant is already at its connection cap.
    Connection,
    /// Rejected because the tenant's token bucket is empty.
    Qps,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Connection => write!(f, "connection limit"),
            LimitKind::Qps => write!(f, "qps limit"),
        }
    }
}

/// Per-tenant limits and live counters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Token-bucket refill rate, in tokens/sec.
    pub qps_rate: f64,
    /// Token-bucket capacity.
    pub burst: f64,
    /// Maximum concurrent connections.
    pub connection_limit: u32,
}

impl RateLimit {
    fn from_env() -> Self {
        Self {
            qps_rate: env_f64_or_default(STREAM_RATE_LIMIT_QPS, DEFAULT_RATE_LIMIT_QPS),
            burst: env_f64_or_default(STREAM_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_BURST),
            connection_limit: env_u32_or_default(
                STREAM_RATE_LIMIT_CONNECTIONS,
                DEFAULT_RATE_LIMIT_CONNECTIONS,
            ),
        }
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limit: RateLimit) -> Self {
        Self {
            tokens: limit.burst,
            capacity: limit.burst,
            refill_rate: limit.qps_rate,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, cost: f64) -> bool {
        self.refill();
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }

    fn reset(&mut self, limit: RateLimit) {
        self.capacity = limit.burst;
        self.refill_rate = limit.qps_rate;
        self.tokens = limit.burst;
        self.last_refill = Instant::now();
    }
}

struct TenantState {
    limit: RateLimit,
    bucket: TokenBucket,
    active_connections: u32,
    last_activity: Instant,
}

impl TenantState {
    fn new(limit: RateLimit) -> Self {
        Self {
            bucket: TokenBucket::new(limit),
            limit,
            active_connections: 0,
            last_activity: Instant::now(),
        }
    }

    /// A tenant is eligible for garbage collection once it has no live
    /// connections, its limits are back to the process defaults, its
    /// bucket has fully refilled, and it has been idle past the TTL.
    fn collectible(&mut self, defaults: RateLimit, idle_ttl: Duration) -> bool {
        self.active_connections == 0
            && self.limit.qps_rate == defaults.qps_rate
            && self.limit.burst == defaults.burst
            && self.limit.connection_limit == defaults.connection_limit
            && self.bucket.is_full()
            && self.last_activity.elapsed() > idle_ttl
    }
}

/// A snapshot of a tenant's remaining quota, suitable for
/// `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
}

/// Per-tenant registry enforcing connection and QPS admission control.
/// Each tenant's state sits behind its own lock (`DashMap`'s sharded
/// concurrent map plus a per-entry `Mutex`) rather than one lock guarding
/// every tenant, so unrelated tenants never serialize on each other's
/// admission checks.
pub struct RateLimiter {
    tenants: DashMap<String, Mutex<TenantState>>,
    default_limit: RateLimit,
    idle_ttl: Duration,
    metric_tenants: RwLock<std::collections::HashSet<String>>,
    violations: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimit::from_env())
    }
}

impl RateLimiter {
    /// Builds a limiter with an explicit default limit (tests, or callers
    /// that don't want environment-driven defaults).
    #[must_use]
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            tenants: DashMap::new(),
            default_limit,
            idle_ttl: Duration::from_secs(env_u64_or_default(
                RATE_LIMITER_IDLE_TTL,
                DEFAULT_IDLE_TTL_SECS,
            )),
            metric_tenants: RwLock::new(std::collections::HashSet::new()),
            violations: AtomicU64::new(0),
        }
    }

    /// Builds a limiter reading every default from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }

    async fn metric_label(&self, tenant_id: &str) -> Cow<'static, str> {
        let label = tenant_label_value(tenant_id);
        let mut seen = self.metric_tenants.write().await;
        if seen.contains(tenant_id) || seen.len() < MAX_TENANT_METRIC_LABELS {
            seen.insert(tenant_id.to_string());
            Cow::Owned(label.into_owned())
        } else {
            Cow::Borrowed("overflow")
        }
    }

    async fn record_violation(&self, tenant_id: &str, kind: LimitKind) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        let label = self.metric_label(tenant_id).await;
        let kind_label = match kind {
            LimitKind::Connection => "connection",
            LimitKind::Qps => "qps",
        };
        record_rate_limit_exceeded_metric(label.as_ref(), kind_label);
    }

    fn entry(&self, tenant_id: &str) -> RefMut<'_, String, Mutex<TenantState>> {
        self.tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| Mutex::new(TenantState::new(self.default_limit)))
    }

    /// True iff the tenant has not yet reached its connection cap.
    pub async fn allow_connection(&self, tenant_id: &str) -> bool {
        let allowed = {
            let entry = self.entry(tenant_id);
            let mut state = entry.lock().expect("tenant mutex poisoned");
            state.last_activity = Instant::now();
            state.active_connections < state.limit.connection_limit
        };
        if !allowed {
            self.record_violation(tenant_id, LimitKind::Connection).await;
        }
        allowed
    }

    /// Registers a new live connection for `tenant_id`.
    pub async fn add_connection(&self, tenant_id: &str) {
        let entry = self.entry(tenant_id);
        let mut state = entry.lock().expect("tenant mutex poisoned");
        state.active_connections += 1;
        state.last_activity = Instant::now();
    }

    /// Deregisters a live connection, running tenant GC opportunistically.
    pub async fn remove_connection(&self, tenant_id: &str) {
        let collectible = {
            let Some(entry) = self.tenants.get(tenant_id) else {
                return;
            };
            let mut state = entry.lock().expect("tenant mutex poisoned");
            state.active_connections = state.active_connections.saturating_sub(1);
            state.last_activity = Instant::now();
            state.collectible(self.default_limit, self.idle_ttl)
        };
        if collectible {
            self.tenants.remove(tenant_id);
        }
    }

    /// Consumes `cost` tokens from the tenant's bucket; `true` if admitted.
    pub async fn allow_qps(&self, tenant_id: &str, cost: f64) -> bool {
        let allowed = {
            let entry = self.entry(tenant_id);
            let mut state = entry.lock().expect("tenant mutex poisoned");
            state.last_activity = Instant::now();
            state.bucket.try_consume(cost)
        };
        if !allowed {
            self.record_violation(tenant_id, LimitKind::Qps).await;
        }
        allowed
    }

    /// Replaces a tenant's limits, resetting its bucket (so a new, higher
    /// burst takes effect immediately rather than slowly refilling into it).
    pub async fn set_limits(&self, tenant_id: &str, limit: RateLimit) {
        let entry = self.entry(tenant_id);
        let mut state = entry.lock().expect("tenant mutex poisoned");
        state.limit = limit;
        state.bucket.reset(limit);
    }

    /// Snapshot of the tenant's remaining quota for response headers.
    pub async fn snapshot(&self, tenant_id: &str) -> RateLimitSnapshot {
        let entry = self.entry(tenant_id);
        let mut state = entry.lock().expect("tenant mutex poisoned");
        state.bucket.refill();
        RateLimitSnapshot {
            limit: state.limit.burst as u32,
            remaining: state.bucket.tokens as u32,
        }
    }

    /// Number of admission refusals recorded since startup.
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Runs idle-tenant GC across the whole registry; intended to be called
    /// periodically from a background task rather than relying solely on
    /// the opportunistic check in `remove_connection`.
    pub async fn sweep_idle_tenants(&self) -> usize {
        let default_limit = self.default_limit;
        let idle_ttl = self.idle_ttl;
        let before = self.tenants.len();
        self.tenants.retain(|_, state| {
            !state.lock().expect("tenant mutex poisoned").collectible(default_limit, idle_ttl)
        });
        before - self.tenants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(qps: f64, burst: f64, conns: u32) -> RateLimit {
        RateLimit {
            qps_rate: qps,
            burst,
            connection_limit: conns,
        }
    }

    #[tokio::test]
    async fn allows_connections_up_to_cap() {
        let rl = RateLimiter::new(limit(10.0, 10.0, 2));
        assert!(rl.allow_connection("tenant-a").await);
        rl.add_connection("tenant-a").await;
        assert!(rl.allow_connection("tenant-a").await);
        rl.add_connection("tenant-a").await;
        assert!(!rl.allow_connection("tenant-a").await);
    }

    #[tokio::test]
    async fn qps_bucket_exhausts_then_refuses() {
        let rl = RateLimiter::new(limit(1.0, 1.0, 100));
        assert!(rl.allow_qps("tenant-b", 1.0).await);
        assert!(!rl.allow_qps("tenant-b", 1.0).await);
    }

    #[tokio::test]
    async fn removing_last_connection_collects_idle_default_tenant() {
        let rl = RateLimiter::new(limit(10.0, 10.0, 5));
        rl.add_connection("tenant-c").await;
        {
            let entry = rl.tenants.get("tenant-c").expect("tenant present");
            entry.lock().expect("tenant mutex poisoned").last_activity = Instant::now() - Duration::from_secs(3600);
        }
        rl.remove_connection("tenant-c").await;
        assert!(!rl.tenants.contains_key("tenant-c"));
    }

    #[tokio::test]
    async fn custom_limit_tenant_is_not_collected() {
        let rl = RateLimiter::new(limit(10.0, 10.0, 5));
        rl.add_connection("tenant-d").await;
        rl.set_limits("tenant-d", limit(50.0, 50.0, 5)).await;
        rl.remove_connection("tenant-d").await;
        assert!(rl.tenants.contains_key("tenant-d"));
    }

    #[test]
    fn unsafe_tenant_label_is_hashed() {
        let label = tenant_label_value("tenant with spaces/slashes");
        assert!(label.starts_with("tenant_"));
        assert!(is_safe_tenant_label(&label));
    }

    #[test]
    fn safe_tenant_label_is_passed_through() {
        assert_eq!(tenant_label_value("tenant-123"), "tenant-123");
    }
}
