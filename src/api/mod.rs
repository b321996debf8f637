//! HTTP surface: application state and router construction.
//!
//! The admission pipeline wraps every route; handlers behind it can assume
//! rate limiting and CSRF verification already happened.

mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::middleware::{
    AdmissionLayer, AdmissionState, CsrfConfig, LimiterRegistry, SecurityHeadersConfig,
    SecurityPolicy, SystemClock, TokenCodec,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionState>,

    /// Mark the secret cookie `Secure` (TLS deployments)
    pub secure_cookies: bool,
}

/// Build the shared state from startup configuration.
pub fn build_state(config: &Config) -> crate::error::Result<AppState> {
    let codec = match &config.security.csrf_signing_key {
        Some(key) => TokenCodec::from_hex(key)?,
        None => TokenCodec::generate(),
    };
    let registry = LimiterRegistry::new(&config.rate_limit, Arc::new(SystemClock));
    let policy = SecurityPolicy::new(&SecurityHeadersConfig {
        csp_directives: config.security.csp_directives.clone(),
        ..Default::default()
    });

    Ok(AppState {
        admission: Arc::new(AdmissionState {
            codec,
            csrf: CsrfConfig::default(),
            registry,
            policy,
        }),
        secure_cookies: config.security.secure_cookies,
    })
}

/// Build the application router with the admission pipeline installed.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health_check))
        .route("/api/csrf", get(handlers::issue_csrf))
        .route("/api/newsletter", post(handlers::subscribe_newsletter))
        .route("/api/analytics", post(handlers::ingest_analytics))
        .layer(AdmissionLayer::new(state.admission.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
