//! End-to-end tests for the admission pipeline.
//!
//! Each test builds a fresh router (fresh limiter state) and drives it with
//! `tower::ServiceExt::oneshot`. Client identity is pinned per test through
//! `x-forwarded-for` so windows never bleed between scenarios.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use gatehouse::config::{ClassLimit, Config, RateLimitSettings};
use gatehouse::prelude::*;

fn limits(default: u32, analytics: u32, performance: u32) -> RateLimitSettings {
    RateLimitSettings {
        default: ClassLimit { points: default, duration_secs: 60, block_duration_secs: 60 },
        analytics: ClassLimit { points: analytics, duration_secs: 60, block_duration_secs: 60 },
        performance: ClassLimit {
            points: performance,
            duration_secs: 60,
            block_duration_secs: 60,
        },
        sweep_interval_secs: 300,
    }
}

fn app_with(rate_limit: RateLimitSettings) -> Router {
    let config = Config { rate_limit, ..Config::default() };
    build_router(build_state(&config).expect("state"))
}

fn app() -> Router {
    app_with(limits(100, 100, 100))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Fetch a secret cookie and token pair from the issuance endpoint.
async fn issue_pair(app: &Router, client: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/csrf")
                .header("x-forwarded-for", client)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("issuance sets the secret cookie")
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    let token = response
        .headers()
        .get("x-csrf-token")
        .expect("issuance exposes the token header")
        .to_str()
        .unwrap()
        .to_string();
    (cookie, token)
}

#[tokio::test]
async fn csrf_issuance_sets_hardened_cookie() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/csrf")
                .header("x-forwarded-for", "203.0.113.10")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("csrf-secret="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Path=/"));
    assert!(response.headers().contains_key("x-csrf-token"));

    let body = body_json(response).await;
    assert!(body.get("message").is_some());
}

#[tokio::test]
async fn mutating_request_with_issued_pair_passes_the_gate() {
    let app = app();
    let (cookie, token) = issue_pair(&app, "203.0.113.11").await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/newsletter")
                .header("x-forwarded-for", "203.0.113.11")
                .header(header::COOKIE, cookie)
                .header("x-csrf-token", token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"reader@example.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    // Past the CSRF gate: succeeds on business logic, not 403.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn mutating_request_without_token_header_is_rejected() {
    let app = app();
    let (cookie, _token) = issue_pair(&app, "203.0.113.12").await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/newsletter")
                .header("x-forwarded-for", "203.0.113.12")
                .header(header::COOKIE, cookie)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"reader@example.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid CSRF token");
}

#[tokio::test]
async fn token_from_another_secret_is_rejected() {
    let app = app();
    let (cookie_a, _) = issue_pair(&app, "203.0.113.13").await;
    let (_, token_b) = issue_pair(&app, "203.0.113.13").await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/newsletter")
                .header("x-forwarded-for", "203.0.113.13")
                .header(header::COOKIE, cookie_a)
                .header("x-csrf-token", token_b)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"reader@example.com"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn exhausted_window_returns_429_with_retry_headers() {
    let app = app_with(limits(3, 100, 100));

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-forwarded-for", "203.0.113.14")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", "203.0.113.14")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "3");
    assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "0");
    assert!(response.headers().contains_key("X-RateLimit-Reset"));
    assert!(response.headers().contains_key("Retry-After"));

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["retry_after_secs"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn admitted_responses_carry_rate_limit_headers() {
    let app = app_with(limits(5, 100, 100));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", "203.0.113.15")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "5");
    assert_eq!(response.headers().get("X-RateLimit-Remaining").unwrap(), "4");
}

#[tokio::test]
async fn other_clients_are_unaffected_by_an_exhausted_key() {
    let app = app_with(limits(1, 100, 100));

    for _ in 0..2 {
        app.clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("x-forwarded-for", "203.0.113.16")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", "203.0.113.17")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn analytics_and_performance_draw_from_separate_buckets() {
    // Two analytics points, plenty of performance headroom.
    let app = app_with(limits(100, 2, 50));
    let client = "203.0.113.18";

    // Rate limiting runs before CSRF, so tokenless posts still consume.
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/analytics")
                    .header("x-forwarded-for", client)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"type":"utm","source":"mail"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/analytics")
                .header("x-forwarded-for", client)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"utm","source":"mail"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Same client, performance discriminator: its bucket is untouched.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/analytics")
                .header("x-forwarded-for", client)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"performance","metric":"lcp"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN, "blocked by csrf, not 429");
}

#[tokio::test]
async fn unparsable_analytics_body_is_limited_as_analytics() {
    let app = app_with(limits(100, 1, 50));
    let client = "203.0.113.19";

    for expected in [StatusCode::FORBIDDEN, StatusCode::TOO_MANY_REQUESTS] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/analytics")
                    .header("x-forwarded-for", client)
                    .body(Body::from("definitely not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), expected);
    }
}

#[tokio::test]
async fn csrf_verified_analytics_ingest_succeeds() {
    let app = app();
    let client = "203.0.113.20";
    let (cookie, token) = issue_pair(&app, client).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/analytics")
                .header("x-forwarded-for", client)
                .header(header::COOKIE, cookie)
                .header("x-csrf-token", token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"performance","metric":"cls"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn document_routes_carry_the_document_profile() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("x-forwarded-for", "203.0.113.21")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    let csp = response
        .headers()
        .get("content-security-policy")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(csp.contains("frame-ancestors 'none'"));
    assert!(response
        .headers()
        .contains_key("strict-transport-security"));
}

#[tokio::test]
async fn api_routes_carry_the_reduced_profile() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/csrf")
                .header("x-forwarded-for", "203.0.113.22")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    assert!(response.headers().get("content-security-policy").is_none());
    assert!(response
        .headers()
        .get("cache-control")
        .unwrap()
        .to_str()
        .unwrap()
        .contains("no-store"));
}

#[tokio::test]
async fn rejections_carry_security_headers_too() {
    let app = app_with(limits(1, 100, 100));
    let client = "203.0.113.23";

    app.clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", client)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", client)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
}

#[tokio::test]
async fn newsletter_validates_email_after_the_gate() {
    let app = app();
    let (cookie, token) = issue_pair(&app, "203.0.113.24").await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/newsletter")
                .header("x-forwarded-for", "203.0.113.24")
                .header(header::COOKIE, cookie)
                .header("x-csrf-token", token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"not-an-address"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let app = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-forwarded-for", "203.0.113.25")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}
