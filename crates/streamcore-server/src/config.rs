//! Typed configuration, one struct per component, each with a `from_env`
//! constructor reading the variable names centralized here. Mirrors
//! `streamcore::env_vars`'s named-constant-plus-typed-accessor convention.

use std::collections::HashSet;

use streamcore::env_vars::{
    env_csv, env_string, env_u64_or_default, env_usize_or_default, REDIS_URL,
    STREAM_ALLOWED_TOPICS, STREAM_HEARTBEAT_SECS, STREAM_MAX_QUEUE, STREAM_RESUME_BACKEND,
};

pub const STREAM_HOST: &str = "STREAM_HOST";
pub const STREAM_PORT: &str = "STREAM_PORT";
pub const STREAM_PUBLISHER_ENABLED: &str = "STREAM_PUBLISHER_ENABLED";
pub const STREAM_DEV_PUBLISH_ENABLED: &str = "STREAM_DEV_PUBLISH_ENABLED";
pub const STREAM_DEV_PUBLISH_TOKEN: &str = "STREAM_DEV_PUBLISH_TOKEN";
pub const STREAM_LOG_FORMAT: &str = "STREAM_LOG_FORMAT";

pub const STREAM_PRODUCER_ENABLED: &str = "STREAM_PRODUCER_ENABLED";
pub const STREAM_PRODUCER_TOPIC: &str = "STREAM_PRODUCER_TOPIC";
pub const STREAM_PRODUCER_INTERVAL_MS: &str = "STREAM_PRODUCER_INTERVAL_MS";

pub const AUTH_JWKS_URL: &str = "AUTH_JWKS_URL";
pub const AUTH_JWT_SECRET: &str = "AUTH_JWT_SECRET";
pub const AUTH_AUDIENCE: &str = "AUTH_AUDIENCE";
pub const AUTH_ISSUER: &str = "AUTH_ISSUER";
pub const AUTH_LEEWAY_SEC: &str = "AUTH_LEEWAY_SEC";
pub const AUTH_REQUIRE_TENANT: &str = "AUTH_REQUIRE_TENANT";
pub const TOKEN_AUDITING_ENABLED: &str = "TOKEN_AUDITING_ENABLED";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("exactly one of AUTH_JWKS_URL or AUTH_JWT_SECRET must be set ({0})")]
    AmbiguousAuthKeying(&'static str),
    #[error("AUTH_JWT_SECRET must be at least 32 characters")]
    WeakSecret,
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Log line format, selected by an explicit config flag rather than
/// sniffing the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Bind address and the endpoint-facing tunables that aren't owned by a
/// more specific component config.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_secs: u64,
    pub max_queue: usize,
    pub publisher_enabled: bool,
    pub dev_publish_enabled: bool,
    pub dev_publish_token: Option<String>,
    pub allowed_topics: HashSet<String>,
    pub log_format: LogFormat,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_raw = env_string(STREAM_PORT).unwrap_or_else(|| "8080".to_string());
        let port: u16 = port_raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(STREAM_PORT, port_raw.clone()))?;

        let log_format = match env_string(STREAM_LOG_FORMAT).as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue(STREAM_LOG_FORMAT, other.to_string()))
            }
        };

        Ok(Self {
            host: env_string(STREAM_HOST).unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            heartbeat_secs: env_u64_or_default(STREAM_HEARTBEAT_SECS, 15),
            max_queue: env_usize_or_default(STREAM_MAX_QUEUE, 1024),
            publisher_enabled: env_bool(STREAM_PUBLISHER_ENABLED, false),
            dev_publish_enabled: env_bool(STREAM_DEV_PUBLISH_ENABLED, false),
            dev_publish_token: env_string(STREAM_DEV_PUBLISH_TOKEN),
            allowed_topics: env_csv(STREAM_ALLOWED_TOPICS).into_iter().collect(),
            log_format,
        })
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn topic_allowed(&self, topic: &str) -> bool {
        self.allowed_topics.is_empty() || self.allowed_topics.contains(topic)
    }
}

/// Which concrete [`streamcore::resume_store::ResumeStore`] backend to
/// build, mirroring `STREAM_RESUME_BACKEND`'s `auto`/`redis`/`memory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeBackendSelection {
    Auto,
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct ResumeConfig {
    pub backend: ResumeBackendSelection,
    pub redis_url: Option<String>,
}

impl ResumeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match env_string(STREAM_RESUME_BACKEND).as_deref() {
            None | Some("auto") => ResumeBackendSelection::Auto,
            Some("redis") => ResumeBackendSelection::Redis,
            Some("memory") => ResumeBackendSelection::Memory,
            Some(other) => {
                return Err(ConfigError::InvalidValue(STREAM_RESUME_BACKEND, other.to_string()))
            }
        };
        Ok(Self {
            backend,
            redis_url: env_string(REDIS_URL),
        })
    }
}

/// Exactly one of `jwks_url` / `secret` is populated; enforced by
/// [`AuthConfig::from_env`] rather than at construction, so tests can build
/// invalid states deliberately if needed.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwks_url: Option<String>,
    pub secret: Option<String>,
    pub audience: String,
    pub issuer: Option<String>,
    pub leeway_secs: u64,
    pub require_tenant: bool,
    pub auditing_enabled: bool,
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwks_url = env_string(AUTH_JWKS_URL);
        let secret = env_string(AUTH_JWT_SECRET);

        match (&jwks_url, &secret) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::AmbiguousAuthKeying("both configured"))
            }
            (None, None) => return Err(ConfigError::AmbiguousAuthKeying("neither configured")),
            _ => {}
        }
        if let Some(s) = &secret {
            if s.len() < 32 {
                return Err(ConfigError::WeakSecret);
            }
        }

        Ok(Self {
            jwks_url,
            secret,
            audience: env_string(AUTH_AUDIENCE).unwrap_or_else(|| "stream".to_string()),
            issuer: env_string(AUTH_ISSUER),
            leeway_secs: env_u64_or_default(AUTH_LEEWAY_SEC, 60),
            require_tenant: env_bool(AUTH_REQUIRE_TENANT, true),
            auditing_enabled: env_bool(TOKEN_AUDITING_ENABLED, true),
        })
    }
}

/// Configuration for the optional background producer loop (§4.7): a
/// single well-known topic driven by an internal clock rather than an
/// external publish call, gated off by default.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub enabled: bool,
    pub topic: String,
    pub interval_ms: u64,
}

impl ProducerConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_bool(STREAM_PRODUCER_ENABLED, false),
            topic: env_string(STREAM_PRODUCER_TOPIC).unwrap_or_else(|| "stream.heartbeat.demo".to_string()),
            interval_ms: env_u64_or_default(STREAM_PRODUCER_INTERVAL_MS, 2000),
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_string(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_vars<F: FnOnce() -> R, R>(vars: &[(&str, Option<&str>)], f: F) -> R {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, std::env::var(k).ok())).collect();
        for (k, v) in vars {
            match v {
                Some(v) => std::env::set_var(k, v),
                None => std::env::remove_var(k),
            }
        }
        let result = f();
        for (k, v) in originals {
            match v {
                Some(v) => std::env::set_var(k, v),
                None => std::env::remove_var(k),
            }
        }
        result
    }

    #[test]
    fn auth_config_rejects_both_keying_modes() {
        with_vars(
            &[(AUTH_JWKS_URL, Some("https://example.invalid/jwks")), (AUTH_JWT_SECRET, Some("x".repeat(40).as_str()))],
            || {
                assert!(matches!(AuthConfig::from_env(), Err(ConfigError::AmbiguousAuthKeying(_))));
            },
        );
    }

    #[test]
    fn auth_config_rejects_neither_keying_mode() {
        with_vars(&[(AUTH_JWKS_URL, None), (AUTH_JWT_SECRET, None)], || {
            assert!(matches!(AuthConfig::from_env(), Err(ConfigError::AmbiguousAuthKeying(_))));
        });
    }

    #[test]
    fn auth_config_rejects_short_secret() {
        with_vars(&[(AUTH_JWKS_URL, None), (AUTH_JWT_SECRET, Some("too-short"))], || {
            assert!(matches!(AuthConfig::from_env(), Err(ConfigError::WeakSecret)));
        });
    }

    #[test]
    fn auth_config_accepts_valid_secret() {
        let secret = "x".repeat(40);
        with_vars(&[(AUTH_JWKS_URL, None), (AUTH_JWT_SECRET, Some(secret.as_str()))], || {
            assert!(AuthConfig::from_env().is_ok());
        });
    }

    #[test]
    fn resume_config_defaults_to_auto() {
        with_vars(&[(STREAM_RESUME_BACKEND, None)], || {
            assert_eq!(ResumeConfig::from_env().unwrap().backend, ResumeBackendSelection::Auto);
        });
    }

    #[test]
    fn topic_allowlist_empty_means_allow_all() {
        with_vars(&[(STREAM_ALLOWED_TOPICS, None), (STREAM_PORT, None)], || {
            let cfg = ServerConfig::from_env().unwrap();
            assert!(cfg.topic_allowed("anything"));
        });
    }
}
