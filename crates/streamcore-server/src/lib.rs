//! SSE/WebSocket delivery endpoints, publish inlet, and debug surface for
//! the real-time update stream. The binary in `main.rs` is a thin wrapper
//! around [`build_router`] and [`AppState`] so integration tests can drive
//! the full router without spawning a process.

pub mod config;
pub mod debug;
pub mod error;
pub mod producer;
pub mod publish;
pub mod sse;
pub mod state;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use streamcore::resume_store::{InMemoryResumeStore, ResumeStore};
use streamcore::{Broker, PrometheusMetrics, RateLimiter, Sequencer};
use streamcore_auth::{TokenVerifier, TokenVerifierConfig};

use config::{AuthConfig, ProducerConfig, ResumeBackendSelection, ResumeConfig, ServerConfig};
use state::AppState;

const DEFAULT_RESUME_CAPACITY: usize = 5000;

/// Builds the resume-store backend named by `resume_config`, falling back
/// to the in-memory ring on any Redis connection failure (`auto` mode)
/// or logging loudly when the failure defeats an explicit `redis` choice.
pub async fn build_resume_store(resume_config: &ResumeConfig) -> Arc<dyn ResumeStore> {
    let max_items = streamcore::env_vars::env_u64_or_default(
        streamcore::env_vars::STREAM_RESUME_MAX_ITEMS,
        streamcore::env_vars::DEFAULT_RESUME_MAX_ITEMS,
    );
    let ttl_secs = streamcore::env_vars::env_u64_or_default(
        streamcore::env_vars::STREAM_RESUME_TTL_SECONDS,
        streamcore::env_vars::DEFAULT_RESUME_TTL_SECS,
    );
    let prefix = streamcore::env_vars::env_string_or_default(
        streamcore::env_vars::STREAM_RESUME_REDIS_PREFIX,
        "stream:resume:",
    );

    let want_redis = matches!(resume_config.backend, ResumeBackendSelection::Redis)
        || (matches!(resume_config.backend, ResumeBackendSelection::Auto) && resume_config.redis_url.is_some());

    if want_redis {
        if let Some(url) = &resume_config.redis_url {
            match streamcore::resume_store::RedisResumeStore::connect(url, prefix, max_items, ttl_secs).await {
                Ok(store) => {
                    info!("resume store backed by redis");
                    return Arc::new(store);
                }
                Err(e) => {
                    if matches!(resume_config.backend, ResumeBackendSelection::Redis) {
                        error!(error = %e, "redis resume backend required but unreachable, falling back to memory");
                    } else {
                        info!(error = %e, "redis resume backend unreachable, falling back to memory");
                    }
                }
            }
        } else if matches!(resume_config.backend, ResumeBackendSelection::Redis) {
            error!("STREAM_RESUME_BACKEND=redis but REDIS_URL is not set, falling back to memory");
        }
    }

    info!("resume store backed by in-memory ring");
    Arc::new(InMemoryResumeStore::new(DEFAULT_RESUME_CAPACITY))
}

/// Builds the sequencer matching `resume_config`'s backend choice, so the
/// sequence source and the resume window share the same Redis instance.
pub async fn build_sequencer(resume_config: &ResumeConfig) -> Sequencer {
    let want_redis = matches!(resume_config.backend, ResumeBackendSelection::Redis)
        || (matches!(resume_config.backend, ResumeBackendSelection::Auto) && resume_config.redis_url.is_some());

    if want_redis {
        if let Some(url) = &resume_config.redis_url {
            let prefix = streamcore::env_vars::env_string_or_default(
                streamcore::env_vars::STREAM_SEQ_REDIS_PREFIX,
                "stream:seq:",
            );
            match redis::Client::open(url.as_str()) {
                Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                    Ok(conn) => return Sequencer::with_redis(conn, prefix),
                    Err(e) => error!(error = %e, "failed to build redis connection manager for sequencer, using local counter"),
                },
                Err(e) => error!(error = %e, "invalid REDIS_URL, sequencer using local counter"),
            }
        }
    }
    Sequencer::local()
}

/// Builds the token verifier from whichever keying mode `auth_config`
/// resolved to, and attaches a Redis-backed JTI store when `REDIS_URL` is
/// reachable so single-use enforcement survives across processes.
pub async fn build_verifier(auth_config: &AuthConfig) -> anyhow::Result<TokenVerifier> {
    let verifier_config = TokenVerifierConfig {
        audience: auth_config.audience.clone(),
        issuer: auth_config.issuer.clone(),
        leeway_secs: auth_config.leeway_secs,
        require_tenant: auth_config.require_tenant,
    };

    let verifier = if let Some(secret) = &auth_config.secret {
        TokenVerifier::from_secret(secret, verifier_config)?
    } else if let Some(url) = &auth_config.jwks_url {
        let (decoding_key, algorithm) = streamcore_auth::fetch_decoding_key(url).await?;
        TokenVerifier::from_decoding_key(decoding_key, algorithm, verifier_config)
    } else {
        // AuthConfig::from_env already enforces exactly-one-of; unreachable in practice.
        anyhow::bail!("no auth keying material configured");
    };

    let verifier = if auth_config.auditing_enabled {
        verifier
    } else {
        verifier.with_audit_sink(Arc::new(streamcore_auth::NoopAuditSink))
    };

    if let Some(redis_url) = streamcore::env_vars::env_string(streamcore::env_vars::REDIS_URL) {
        if let Ok(client) = redis::Client::open(redis_url.as_str()) {
            if let Ok(conn) = redis::aio::ConnectionManager::new(client).await {
                return Ok(verifier.with_jti_store(Arc::new(streamcore_auth::RedisJtiStore::new(conn, "stream:jti:"))));
            }
        }
        error!("REDIS_URL set but unreachable, JTI single-use enforcement will not survive process restarts");
    }

    Ok(verifier)
}

/// Spawns the background producer loop if `STREAM_PRODUCER_ENABLED` is
/// set, returning its shutdown sender and join handle so the caller can
/// stop it as part of graceful shutdown. Returns `None` when disabled.
pub fn spawn_producer(
    broker: Arc<Broker>,
    config: &ProducerConfig,
) -> Option<(tokio::sync::oneshot::Sender<()>, tokio::task::JoinHandle<()>)> {
    if !config.enabled {
        return None;
    }
    let (tx, rx) = tokio::sync::oneshot::channel();
    let topic = config.topic.clone();
    let interval_ms = config.interval_ms;
    let handle = tokio::spawn(async move { producer::run(broker, topic, interval_ms, rx).await });
    Some((tx, handle))
}

/// Assembles the full router: delivery endpoints, the publish inlet, and
/// the debug surface, with tracing and permissive CORS layered on top.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/stream/:topic", get(sse::stream_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/stream/publish/:topic", post(publish::publish_handler))
        .route("/_dev_publish/:topic", post(publish::dev_publish_handler))
        .route("/stream/_stats", get(debug::stats_handler))
        .route("/stream/_topics", get(debug::topics_handler))
        .route("/stream/_resume", get(debug::resume_handler))
        .route("/stream/_health", get(debug::health_handler))
        .route("/ws/health", get(debug::health_handler))
        .route("/stream/_metrics", get(debug::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Builds [`AppState`] around an already-resolved [`ServerConfig`]: the
/// broker (with its chosen resume-store backend and sequencer), the rate
/// limiter, and the token verifier.
pub async fn build_app_state(server_config: ServerConfig) -> anyhow::Result<AppState> {
    let auth_config = AuthConfig::from_env()?;
    let resume_config = ResumeConfig::from_env()?;

    let resume_store = build_resume_store(&resume_config).await;
    let sequencer = build_sequencer(&resume_config).await;
    let verifier = build_verifier(&auth_config).await?;

    Ok(AppState {
        broker: Arc::new(Broker::new(sequencer, resume_store).with_metrics(Arc::new(PrometheusMetrics))),
        rate_limiter: Arc::new(RateLimiter::from_env()),
        verifier: Arc::new(verifier),
        config: Arc::new(server_config),
    })
}
