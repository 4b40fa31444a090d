//! Centralized environment variable names and typed accessors for `streamcore`.
//!
//! Every tunable the core reads at startup is named here once, with its
//! default documented alongside the constant, so a deployer can `grep` this
//! file instead of the call sites to find the full configuration surface.

// =============================================================================
// Environment variable name constants
// =============================================================================

/// Default per-tenant token-bucket refill rate (tokens/sec).
pub const STREAM_RATE_LIMIT_QPS: &str = "STREAM_RATE_LIMIT_QPS";
/// Default per-tenant concurrent connection cap.
pub const STREAM_RATE_LIMIT_CONNECTIONS: &str = "STREAM_RATE_LIMIT_CONNECTIONS";
/// Default per-tenant token-bucket burst capacity.
pub const STREAM_RATE_LIMIT_BURST: &str = "STREAM_RATE_LIMIT_BURST";
/// Idle threshold (seconds) after which an inactive tenant is garbage collected.
pub const RATE_LIMITER_IDLE_TTL: &str = "RATE_LIMITER_IDLE_TTL";

/// Comma-separated allowlist of topics acceptable to the publish endpoint.
pub const STREAM_ALLOWED_TOPICS: &str = "STREAM_ALLOWED_TOPICS";

/// Resume-store backend selection: `auto`, `redis`, or `memory`.
pub const STREAM_RESUME_BACKEND: &str = "STREAM_RESUME_BACKEND";
/// TTL (seconds) applied to each topic's resume window.
pub const STREAM_RESUME_TTL_SECONDS: &str = "STREAM_RESUME_TTL_SECONDS";
/// Maximum number of envelopes retained per topic in the resume store.
pub const STREAM_RESUME_MAX_ITEMS: &str = "STREAM_RESUME_MAX_ITEMS";
/// Key prefix used for resume-store sorted sets in Redis.
pub const STREAM_RESUME_REDIS_PREFIX: &str = "STREAM_RESUME_REDIS_PREFIX";
/// Key prefix used for the sequencer's per-topic counters in Redis.
pub const STREAM_SEQ_REDIS_PREFIX: &str = "STREAM_SEQ_REDIS_PREFIX";

/// Redis connection URL (preferred over the discrete `REDIS_*` vars below).
pub const REDIS_URL: &str = "REDIS_URL";
/// Redis host, used when `REDIS_URL` is unset.
pub const REDIS_HOST: &str = "REDIS_HOST";
/// Redis port, used when `REDIS_URL` is unset.
pub const REDIS_PORT: &str = "REDIS_PORT";
/// Redis logical database index.
pub const REDIS_DB: &str = "REDIS_DB";
/// Redis `AUTH` password.
pub const REDIS_PASSWORD: &str = "REDIS_PASSWORD";

/// Idle heartbeat cadence, in seconds, for subscriber queues with no traffic.
pub const STREAM_HEARTBEAT_SECS: &str = "STREAM_HEARTBEAT_SECS";
/// Per-subscriber bounded queue capacity.
pub const STREAM_MAX_QUEUE: &str = "STREAM_MAX_QUEUE";

// =============================================================================
// Defaults
// =============================================================================

/// Default token-bucket refill rate: 10 requests/sec per tenant.
pub const DEFAULT_RATE_LIMIT_QPS: f64 = 10.0;
/// Default connection cap: 100 concurrent connections per tenant.
pub const DEFAULT_RATE_LIMIT_CONNECTIONS: u32 = 100;
/// Default burst capacity: equal to one second of the default refill rate.
pub const DEFAULT_RATE_LIMIT_BURST: f64 = 20.0;
/// Default idle-tenant GC threshold: 10 minutes.
pub const DEFAULT_IDLE_TTL_SECS: u64 = 600;

/// Default resume-window TTL: 1 hour, matching the in-memory ring's rough
/// retention under steady publish load.
pub const DEFAULT_RESUME_TTL_SECS: u64 = 3600;
/// Default resume-window cap: 5000 envelopes per topic.
pub const DEFAULT_RESUME_MAX_ITEMS: u64 = 5000;
/// Default in-memory ring capacity per topic, used when Redis is absent.
pub const DEFAULT_RING_CAPACITY: usize = 1000;

/// Default idle-heartbeat cadence.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
/// Default per-subscriber queue capacity.
pub const DEFAULT_MAX_QUEUE: usize = 1024;

/// Default replay page size for a single `replay_since` call.
pub const DEFAULT_REPLAY_LIMIT: usize = 500;

// =============================================================================
// Typed helpers
// =============================================================================

/// Reads an environment variable as a string, returning `None` if unset.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Reads an environment variable as a string, returning `default` if unset.
#[must_use]
pub fn env_string_or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Reads an environment variable as a `u64`, falling back to `default` if
/// unset or unparsable. Parse failures are logged rather than silently
/// swallowed so misconfiguration is visible in the logs.
#[must_use]
pub fn env_u64_or_default(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "invalid u64 env var, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Reads an environment variable as a `u32`, falling back to `default` if
/// unset or unparsable.
#[must_use]
pub fn env_u32_or_default(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<u32>().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "invalid u32 env var, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Reads an environment variable as an `f64`, falling back to `default` if
/// unset or unparsable.
#[must_use]
pub fn env_f64_or_default(name: &str, default: f64) -> f64 {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<f64>().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "invalid f64 env var, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Reads an environment variable as a `usize`, falling back to `default` if
/// unset or unparsable.
#[must_use]
pub fn env_usize_or_default(name: &str, default: usize) -> usize {
    match std::env::var(name) {
        Ok(raw) => raw.parse::<usize>().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "invalid usize env var, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Parses a comma-separated list, trimming whitespace and dropping empty
/// entries. Returns an empty `Vec` if the variable is unset.
#[must_use]
pub fn env_csv(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes env-var mutation across tests in this module; `std::env::set_var`
    // is process-global and tests run concurrently by default.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_var<F, R>(name: &str, value: Option<&str>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let original = env::var(name).ok();
        match value {
            Some(v) => env::set_var(name, v),
            None => env::remove_var(name),
        }
        let result = f();
        match original {
            Some(v) => env::set_var(name, v),
            None => env::remove_var(name),
        }
        result
    }

    #[test]
    fn env_u64_or_default_uses_default_on_missing() {
        with_env_var("STREAMCORE_TEST_U64", None, || {
            assert_eq!(env_u64_or_default("STREAMCORE_TEST_U64", 42), 42);
        });
    }

    #[test]
    fn env_u64_or_default_parses_set_value() {
        with_env_var("STREAMCORE_TEST_U64", Some("7"), || {
            assert_eq!(env_u64_or_default("STREAMCORE_TEST_U64", 42), 7);
        });
    }

    #[test]
    fn env_u64_or_default_falls_back_on_garbage() {
        with_env_var("STREAMCORE_TEST_U64", Some("not-a-number"), || {
            assert_eq!(env_u64_or_default("STREAMCORE_TEST_U64", 42), 42);
        });
    }

    #[test]
    fn env_csv_splits_and_trims() {
        with_env_var("STREAMCORE_TEST_CSV", Some("a, b ,,c"), || {
            assert_eq!(
                env_csv("STREAMCORE_TEST_CSV"),
                vec!["a".to_string(), "b".to_string(), "c".to_string()]
            );
        });
    }

    #[test]
    fn env_csv_empty_when_unset() {
        with_env_var("STREAMCORE_TEST_CSV_UNSET", None, || {
            assert!(env_csv("STREAMCORE_TEST_CSV_UNSET").is_empty());
        });
    }
}
