//! Configuration management.
//!
//! Everything here is startup-time state: limiter allowances, the CSRF
//! signing key and the CSP directive list are fixed once the process is up.

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// CSRF and header policy configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Per-class rate limiter configuration
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Hex-encoded HMAC signing key for CSRF tokens. A random key is
    /// generated at startup when unset, which invalidates outstanding
    /// tokens across restarts.
    pub csrf_signing_key: Option<String>,

    /// Mark the secret cookie `Secure` (production deployments behind TLS)
    #[serde(default)]
    pub secure_cookies: bool,

    /// Ordered Content-Security-Policy directive list for document routes
    #[serde(default = "default_csp_directives")]
    pub csp_directives: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csrf_signing_key: None,
            secure_cookies: false,
            csp_directives: default_csp_directives(),
        }
    }
}

/// Allowance for one endpoint class.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClassLimit {
    /// Admissions per window
    pub points: u32,

    /// Window length in seconds
    pub duration_secs: u64,

    /// How long a key stays blocked after exhausting the window
    pub block_duration_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_limit_default")]
    pub default: ClassLimit,

    #[serde(default = "default_limit_analytics")]
    pub analytics: ClassLimit,

    /// High-frequency low-cost telemetry gets a materially higher allowance
    #[serde(default = "default_limit_performance")]
    pub performance: ClassLimit,

    /// Interval between sweeps of expired counter entries, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default: default_limit_default(),
            analytics: default_limit_analytics(),
            performance: default_limit_performance(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_limit_default() -> ClassLimit {
    ClassLimit { points: 100, duration_secs: 60, block_duration_secs: 60 }
}
fn default_limit_analytics() -> ClassLimit {
    ClassLimit { points: 60, duration_secs: 60, block_duration_secs: 60 }
}
fn default_limit_performance() -> ClassLimit {
    ClassLimit { points: 600, duration_secs: 60, block_duration_secs: 30 }
}
fn default_sweep_interval() -> u64 { 300 }
fn default_log_level() -> String { "info".to_string() }
fn default_csp_directives() -> Vec<String> {
    [
        "default-src 'self'",
        "script-src 'self' 'unsafe-inline' 'unsafe-eval'",
        "style-src 'self' 'unsafe-inline'",
        "img-src 'self' data:",
        "font-src 'self'",
        "connect-src 'self'",
        "frame-ancestors 'none'",
        "base-uri 'self'",
        "form-action 'self'",
        "upgrade-insecure-requests",
        "block-all-mixed-content",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GATEHOUSE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GATEHOUSE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
