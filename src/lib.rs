//! # Gatehouse
//!
//! Request-admission security layer for an HTTP edge. Every inbound
//! request passes one pipeline before any application logic runs:
//!
//! - **Classification**: endpoint class and header profile resolution
//! - **Rate limiting**: per-client fixed-window counters with a block
//!   duration, one limiter per endpoint class
//! - **CSRF**: signed double-submit token verification on mutating API
//!   requests, stateless on the server
//! - **Security headers**: declarative document/API header profiles
//!
//! Rate limiting runs before CSRF verification so token probing is itself
//! bounded; rejections short-circuit the rest of the pipeline.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod telemetry;

pub use error::{ErrorCode, ErrorResponse, GatehouseError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, build_state, AppState};
    pub use crate::config::{ClassLimit, Config, RateLimitSettings};
    pub use crate::error::{ErrorCode, ErrorResponse, GatehouseError, Result};
    pub use crate::middleware::{
        AdmissionLayer, AdmissionState, Clock, ConsumeOutcome, CsrfConfig, EndpointClass,
        FixedWindowLimiter, HeaderProfile, IssuedToken, LimiterRegistry, SecurityPolicy,
        SystemClock, TokenCodec, CSRF_COOKIE, CSRF_HEADER,
    };
}
