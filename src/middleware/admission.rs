//! The per-request admission pipeline.
//!
//! One tower service evaluates, in order: endpoint classification,
//! rate-limit consumption, CSRF verification for mutating API requests,
//! and security-header application. The ordering is load-bearing: rate
//! limiting runs first so forged-token probing is itself bounded, and the
//! CSRF gate runs before any state-mutating handler. Rejections
//! short-circuit; no later stage runs once one fires.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Method},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use chrono::Utc;
use futures::future::BoxFuture;
use metrics::counter;
use tower::{Layer, Service};
use tracing::debug;

use crate::error::GatehouseError;
use crate::middleware::csrf::{CsrfConfig, TokenCodec};
use crate::middleware::rate_limit::{
    extract_client_ip, ConsumeOutcome, EndpointClass, LimiterRegistry, ANALYTICS_PATH,
    CLASSIFY_BODY_LIMIT,
};
use crate::middleware::security_headers::{HeaderProfile, SecurityPolicy};

/// Everything the pipeline consults, owned once and shared by reference.
pub struct AdmissionState {
    pub codec: TokenCodec,
    pub csrf: CsrfConfig,
    pub registry: LimiterRegistry,
    pub policy: SecurityPolicy,
}

/// Tower layer installing the admission pipeline.
#[derive(Clone)]
pub struct AdmissionLayer {
    state: Arc<AdmissionState>,
}

impl AdmissionLayer {
    pub fn new(state: Arc<AdmissionState>) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService { inner, state: self.state.clone() }
    }
}

#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    state: Arc<AdmissionState>,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let profile = if path.starts_with("/api/") {
                HeaderProfile::Api
            } else {
                HeaderProfile::Document
            };
            let client_ip = extract_client_ip(req.headers());

            let (req, class) = classify_request(&state.registry, req, &method, &path).await;

            let outcome = state.registry.consume(class, client_ip);
            if !outcome.allowed {
                counter!("rate_limit_rejected_total", "class" => class.as_str()).increment(1);
                let mut response = rate_limited(&outcome).into_response();
                state.policy.apply(response.headers_mut(), profile);
                return Ok(response);
            }

            if profile == HeaderProfile::Api
                && state.csrf.is_protected(&method)
                && !state.csrf.is_exempt(&path)
            {
                if !verify_double_submit(&state, &req) {
                    counter!("csrf_rejected_total").increment(1);
                    let mut response = GatehouseError::CsrfRejected.into_response();
                    state.policy.apply(response.headers_mut(), profile);
                    return Ok(response);
                }
                debug!(%path, "csrf pair verified");
            }

            let mut response = inner.call(req).await?;
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(outcome.limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(outcome.remaining));
            headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_timestamp(&outcome)));
            state.policy.apply(headers, profile);
            Ok(response)
        })
    }
}

/// Classify the request, buffering a bounded body prefix when the analytics
/// discriminator is needed. An oversized or unreadable body degrades to the
/// analytics class; it never blocks or rejects.
async fn classify_request(
    registry: &LimiterRegistry,
    req: Request,
    method: &Method,
    path: &str,
) -> (Request, EndpointClass) {
    if method != Method::POST || path != ANALYTICS_PATH {
        let class = registry.classify(method, path, None);
        return (req, class);
    }

    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, CLASSIFY_BODY_LIMIT).await {
        Ok(bytes) => {
            let class = registry.classify(method, path, Some(&bytes));
            (Request::from_parts(parts, Body::from(bytes)), class)
        }
        Err(e) => {
            debug!(error = %e, "analytics body unavailable for classification");
            (
                Request::from_parts(parts, Body::empty()),
                EndpointClass::Analytics,
            )
        }
    }
}

/// Check the secret cookie against the token header. Missing halves and
/// mismatches are one and the same failure.
fn verify_double_submit(state: &AdmissionState, req: &Request) -> bool {
    let jar = CookieJar::from_headers(req.headers());
    let Some(secret) = jar.get(&state.csrf.cookie_name).map(|c| c.value().to_string()) else {
        return false;
    };
    let Some(token) = req
        .headers()
        .get(state.csrf.token_header.as_str())
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    state.codec.verify(&secret, token)
}

fn rate_limited(outcome: &ConsumeOutcome) -> GatehouseError {
    let reset_after = chrono::Duration::from_std(outcome.reset_after)
        .unwrap_or_else(|_| chrono::Duration::zero());
    GatehouseError::RateLimited {
        limit: outcome.limit,
        remaining: outcome.remaining,
        reset_at: Utc::now() + reset_after,
        retry_after_secs: outcome.reset_after.as_secs().max(1),
    }
}

fn reset_timestamp(outcome: &ConsumeOutcome) -> i64 {
    let reset_after = chrono::Duration::from_std(outcome.reset_after)
        .unwrap_or_else(|_| chrono::Duration::zero());
    (Utc::now() + reset_after).timestamp()
}
