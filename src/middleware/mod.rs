//! Admission middleware for the HTTP edge.
pub mod admission;
pub mod csrf;
pub mod rate_limit;
pub mod security_headers;

pub use admission::{AdmissionLayer, AdmissionService, AdmissionState};
pub use csrf::{CsrfConfig, IssuedToken, TokenCodec, CSRF_COOKIE, CSRF_HEADER};
pub use rate_limit::{
    Clock, ConsumeOutcome, EndpointClass, FixedWindowLimiter, LimiterRegistry, SystemClock,
};
pub use security_headers::{HeaderProfile, SecurityHeadersConfig, SecurityPolicy};
