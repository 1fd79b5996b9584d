//! Configuration types for the gateway
//!
//! Field names follow the YAML configuration surface (camelCase). Durations
//! are written in human form (`5s`, `250ms`) and parsed via `humantime_serde`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level gateway configuration, as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Proxy listener settings
    pub proxy: ServerConfig,

    /// Upstream providers, in priority/declaration order
    pub targets: Vec<TargetConfig>,

    /// Shared probe settings applied to every target
    #[serde(default)]
    pub health_checks: HealthCheckConfig,

    /// Ordered body-substring rules that downgrade a 2xx/3xx response
    #[serde(default)]
    pub exceptions: Vec<Exception>,

    /// Solana mode: slot-based probes and a secondary WebSocket listener
    #[serde(default)]
    pub solana: bool,

    /// Metrics/healthz listener settings
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Optional administration listener settings
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

/// Proxy listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen port, kept as a string so it can come straight from `${PORT}`
    pub port: String,

    /// Deadline for an upstream to produce a response
    #[serde(default = "default_upstream_timeout", with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// When false, selection always walks targets from declaration order
    #[serde(default = "default_true")]
    pub enable_randomization: bool,
}

/// One upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Unique, human-readable provider name
    pub name: String,

    /// Transport endpoints for this provider
    pub connection: TargetConnection,
}

/// Transport endpoints of a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConnection {
    /// HTTP endpoint, always present
    pub http: HttpConnection,

    /// Optional WebSocket endpoint
    #[serde(default)]
    pub ws: Option<WsConnection>,
}

/// HTTP endpoint settings of a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnection {
    /// Endpoint URL
    pub url: String,

    /// Whether the provider accepts compressed request bodies as-is.
    /// When false, gzip client bodies are decompressed before forwarding.
    #[serde(default)]
    pub compression: bool,

    /// Disable connection reuse towards this provider
    #[serde(default)]
    pub disable_keep_alives: bool,
}

/// WebSocket endpoint settings of a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsConnection {
    /// Endpoint URL (`ws://` or `wss://`)
    pub url: String,
}

/// Shared probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Pause between the end of one probe and the start of the next
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Wall-clock deadline for a single probe
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Consecutive failures before a provider is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive successes before a provider is marked healthy again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// A body-substring rule that turns an otherwise-successful response into a
/// retryable failure. Rules are evaluated in declaration order; the first
/// match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    /// Substring searched for in the response body
    #[serde(rename = "match")]
    pub pattern: String,

    /// Error tag emitted when the rule fires; defaults to the pattern
    #[serde(default)]
    pub message: String,
}

impl Exception {
    /// The error tag for this rule.
    pub fn message(&self) -> &str {
        if self.message.is_empty() {
            &self.pattern
        } else {
            &self.message
        }
    }
}

/// Metrics/healthz listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Listen port for `/metrics` and `/healthz`
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

/// Administration listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    /// Listen port for the admin API
    #[serde(default = "default_admin_port")]
    pub port: u16,

    /// Prefix prepended to every admin route
    #[serde(default)]
    pub base_path: String,

    /// Addresses allowed through the admin auth guard (case-insensitive)
    #[serde(default)]
    pub admins: Vec<String>,

    /// Maximum accepted bearer token age, in seconds
    #[serde(default = "default_max_token_lifespan")]
    pub max_token_lifespan: u64,
}

fn default_true() -> bool {
    true
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_success_threshold() -> u32 {
    1
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_admin_port() -> u16 {
    7926
}

fn default_max_token_lifespan() -> u64 {
    86400
}
