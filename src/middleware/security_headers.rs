//! Declarative security response headers.
//!
//! Two fixed profiles, computed once at construction and merged into
//! responses as a pure add/override: applying the policy never strips
//! headers set by upstream logic.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

/// Which header set a response gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Full document hardening, HSTS and CSP included
    Document,

    /// Reduced set for JSON endpoints; no long-lived cache directives
    Api,
}

/// Configuration for the header tables.
#[derive(Debug, Clone)]
pub struct SecurityHeadersConfig {
    /// Ordered CSP directive list for document routes
    pub csp_directives: Vec<String>,

    /// HSTS max-age in seconds
    pub hsts_max_age: u64,

    /// Append `includeSubDomains` to HSTS
    pub hsts_include_subdomains: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            csp_directives: crate::config::SecurityConfig::default().csp_directives,
            hsts_max_age: 31_536_000,
            hsts_include_subdomains: true,
        }
    }
}

/// Precomputed header tables for both profiles.
pub struct SecurityPolicy {
    document: Vec<(HeaderName, HeaderValue)>,
    api: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityPolicy {
    pub fn new(config: &SecurityHeadersConfig) -> Self {
        let base = [
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
        ];

        let mut document: Vec<(HeaderName, HeaderValue)> = base.to_vec();
        document.push((
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
        ));
        let mut hsts = format!("max-age={}", config.hsts_max_age);
        if config.hsts_include_subdomains {
            hsts.push_str("; includeSubDomains");
        }
        if let Ok(value) = HeaderValue::from_str(&hsts) {
            document.push((header::STRICT_TRANSPORT_SECURITY, value));
        }
        document.push((
            HeaderName::from_static("x-xss-protection"),
            HeaderValue::from_static("1; mode=block"),
        ));
        if let Ok(value) = HeaderValue::from_str(&config.csp_directives.join("; ")) {
            document.push((header::CONTENT_SECURITY_POLICY, value));
        }

        let mut api: Vec<(HeaderName, HeaderValue)> = base.to_vec();
        api.push((
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        ));

        Self { document, api }
    }

    /// Merge the profile's header set into `headers`, overriding on
    /// collision and leaving everything else untouched.
    pub fn apply(&self, headers: &mut HeaderMap, profile: HeaderProfile) {
        let table = match profile {
            HeaderProfile::Document => &self.document,
            HeaderProfile::Api => &self.api,
        };
        for (name, value) in table {
            headers.insert(name.clone(), value.clone());
        }
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self::new(&SecurityHeadersConfig::default())
    }
}
