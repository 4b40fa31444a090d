//! Shared application state, constructed once at startup and handed to
//! every handler via axum's `State` extractor. Replaces the teacher's
//! module-level singleton services with an explicit, injected context.

use std::sync::Arc;

use streamcore::{Broker, RateLimiter};
use streamcore_auth::TokenVerifier;

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub verifier: Arc<TokenVerifier>,
    pub config: Arc<ServerConfig>,
}
