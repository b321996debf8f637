//! HTTP request handlers.
//!
//! Handlers return `Result<impl IntoResponse, GatehouseError>` where they
//! can fail, so rejections map to proper status codes via `IntoResponse`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{Html, IntoResponse},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info};

use super::AppState;
use crate::error::GatehouseError;
use crate::middleware::CSRF_HEADER;

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Document index. Exists so document-scoped responses (and their header
/// profile) have a route to land on.
pub async fn index() -> impl IntoResponse {
    Html("<!doctype html><html><head><title>gatehouse</title></head><body><h1>gatehouse</h1></body></html>")
}

/// Issue a fresh CSRF secret/token pair.
///
/// The secret rides an HTTP-only, same-site-strict cookie; the token is
/// exposed in the `x-csrf-token` response header for client code to echo
/// back on mutating requests. This endpoint bootstraps the scheme, so the
/// pipeline exempts it from verification (rate limiting still applies).
pub async fn issue_csrf(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let issued = state.admission.codec.issue();

    let mut cookie = Cookie::new(state.admission.csrf.cookie_name.clone(), issued.secret);
    cookie.set_http_only(true);
    cookie.set_secure(state.secure_cookies);
    cookie.set_same_site(SameSite::Strict);
    cookie.set_path("/");
    let jar = jar.add(cookie);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&issued.token) {
        headers.insert(CSRF_HEADER, value);
    }

    (
        jar,
        headers,
        Json(serde_json::json!({ "message": "CSRF token issued" })),
    )
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub email: String,
}

/// Newsletter subscription: the mutating endpoint of record behind the
/// CSRF gate. Persistence lives with an external collaborator; this
/// handler validates and acknowledges.
pub async fn subscribe_newsletter(
    Json(request): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, GatehouseError> {
    let email = request.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(GatehouseError::Validation("a valid email address is required".into()));
    }

    info!("newsletter subscription accepted");
    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Subscribed"
    })))
}

/// Telemetry ingest. Fire-and-forget: malformed payloads are counted and
/// acknowledged rather than bounced, mirroring the lenient classification
/// upstream.
pub async fn ingest_analytics(body: Bytes) -> impl IntoResponse {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(event) => {
            let kind = event
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("unknown")
                .to_string();
            counter!("analytics_events_total", "type" => kind).increment(1);
        }
        Err(e) => {
            debug!(error = %e, "discarding unparsable analytics payload");
            counter!("analytics_events_total", "type" => "unparsable").increment(1);
        }
    }

    Json(serde_json::json!({ "success": true }))
}
