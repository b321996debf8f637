//! Per-client, per-endpoint-class rate limiting.
//!
//! Fixed-window counters with a short block duration: exhausting a window
//! blocks the key outright until the block elapses, then the window resets
//! from zero. Strict reset, no sliding-window credit. Burstier than a token
//! bucket, and deliberately so.
//!
//! Counters are held in-process, one `DashMap` per endpoint class so
//! unrelated clients never contend on a global lock. The read-modify-write
//! for one key happens entirely inside that key's lock with no suspension
//! point, which is what bounds concurrent admissions to the configured
//! allowance.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::{ClassLimit, RateLimitSettings};

/// Path whose POST bodies carry the telemetry `type` discriminator.
pub const ANALYTICS_PATH: &str = "/api/analytics";

/// Upper bound on the body prefix inspected during classification.
pub const CLASSIFY_BODY_LIMIT: usize = 64 * 1024;

/// Time source for window accounting. Injected so expiry is testable
/// without sleeping; production uses the monotonic system clock.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Logical rate-limit policy bucket, distinct from the literal URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Default,
    Analytics,
    Performance,
}

impl EndpointClass {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Analytics => "analytics",
            Self::Performance => "performance",
        }
    }
}

/// Result of one consumption attempt.
#[derive(Debug, Clone, Copy)]
pub struct ConsumeOutcome {
    /// Whether the request is admitted
    pub allowed: bool,

    /// Configured allowance for the resolved class
    pub limit: u32,

    /// Admissions left in the active window
    pub remaining: u32,

    /// Time until the window (or the block, when rejected) resets
    pub reset_after: Duration,
}

/// Per-key counter state.
#[derive(Debug, Clone, Copy)]
struct Window {
    consumed: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

impl Window {
    fn fresh(now: Instant) -> Self {
        Self { consumed: 0, window_start: now, blocked_until: None }
    }
}

/// Fixed-window counter map for one endpoint class.
pub struct FixedWindowLimiter {
    limit: ClassLimit,
    windows: DashMap<IpAddr, Mutex<Window>>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(limit: ClassLimit, clock: Arc<dyn Clock>) -> Self {
        Self { limit, windows: DashMap::new(), clock }
    }

    pub fn limit(&self) -> ClassLimit {
        self.limit
    }

    /// Record one consumption attempt for `key`.
    ///
    /// Admissions past the allowance flip the key into a blocked state for
    /// the configured block duration; while blocked, attempts are rejected
    /// without further accounting. Consumption is never rolled back, so a
    /// client that aborts mid-request has still spent its slot.
    pub fn consume(&self, key: IpAddr) -> ConsumeOutcome {
        let now = self.clock.now();
        let duration = Duration::from_secs(self.limit.duration_secs);
        let block = Duration::from_secs(self.limit.block_duration_secs);

        let entry = self
            .windows
            .entry(key)
            .or_insert_with(|| Mutex::new(Window::fresh(now)));
        let mut window = entry.lock();

        if let Some(until) = window.blocked_until {
            if now < until {
                return self.rejected(until - now);
            }
            *window = Window::fresh(now);
        }

        if now.duration_since(window.window_start) >= duration {
            *window = Window::fresh(now);
        }

        window.consumed = window.consumed.saturating_add(1);

        // Anything past the allowance, including a corrupt counter that
        // skipped the boundary, fails closed into the blocked state.
        if window.consumed > self.limit.points {
            let until = now + block;
            window.blocked_until = Some(until);
            return self.rejected(until - now);
        }

        let remaining = self.limit.points - window.consumed;
        let elapsed = now.duration_since(window.window_start);
        ConsumeOutcome {
            allowed: true,
            limit: self.limit.points,
            remaining,
            reset_after: duration.saturating_sub(elapsed),
        }
    }

    fn rejected(&self, reset_after: Duration) -> ConsumeOutcome {
        ConsumeOutcome {
            allowed: false,
            limit: self.limit.points,
            remaining: 0,
            reset_after,
        }
    }

    /// Drop entries whose window and block have both elapsed with no
    /// further traffic.
    pub fn sweep_expired(&self) {
        let now = self.clock.now();
        let ttl = Duration::from_secs(self.limit.duration_secs + self.limit.block_duration_secs);
        self.windows.retain(|_, entry| {
            let window = entry.lock();
            if let Some(until) = window.blocked_until {
                if now < until {
                    return true;
                }
            }
            now.duration_since(window.window_start) < ttl
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

/// Maps endpoint classes to their configured limiters and classifies
/// inbound requests into a class.
pub struct LimiterRegistry {
    default: FixedWindowLimiter,
    analytics: FixedWindowLimiter,
    performance: FixedWindowLimiter,
}

impl LimiterRegistry {
    pub fn new(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            default: FixedWindowLimiter::new(settings.default, clock.clone()),
            analytics: FixedWindowLimiter::new(settings.analytics, clock.clone()),
            performance: FixedWindowLimiter::new(settings.performance, clock),
        }
    }

    /// Resolve a request into an endpoint class.
    ///
    /// POSTs to the analytics path are split on the JSON `type`
    /// discriminator; an unparsable or absent body degrades to the coarser
    /// `analytics` class rather than failing the request.
    pub fn classify(&self, method: &Method, path: &str, body: Option<&[u8]>) -> EndpointClass {
        if method != Method::POST || path != ANALYTICS_PATH {
            return EndpointClass::Default;
        }
        let Some(bytes) = body else {
            return EndpointClass::Analytics;
        };
        match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) if value.get("type").and_then(|t| t.as_str()) == Some("performance") => {
                EndpointClass::Performance
            }
            Ok(_) => EndpointClass::Analytics,
            Err(e) => {
                debug!(error = %e, "unparsable analytics body, falling back to analytics class");
                EndpointClass::Analytics
            }
        }
    }

    pub fn resolve(&self, class: EndpointClass) -> &FixedWindowLimiter {
        match class {
            EndpointClass::Default => &self.default,
            EndpointClass::Analytics => &self.analytics,
            EndpointClass::Performance => &self.performance,
        }
    }

    /// Classify, then consume from the resolved limiter.
    pub fn consume(&self, class: EndpointClass, key: IpAddr) -> ConsumeOutcome {
        let outcome = self.resolve(class).consume(key);
        counter!(
            "rate_limit_checks_total",
            "class" => class.as_str(),
            "allowed" => if outcome.allowed { "true" } else { "false" }
        )
        .increment(1);
        outcome
    }

    pub fn sweep_expired(&self) {
        self.default.sweep_expired();
        self.analytics.sweep_expired();
        self.performance.sweep_expired();
    }
}

/// Extract the client IP with forwarded-header precedence:
/// `x-forwarded-for` first entry, then `x-real-ip`, then loopback.
pub fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if let Ok(ip) = real.trim().parse() {
            return ip;
        }
    }
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
