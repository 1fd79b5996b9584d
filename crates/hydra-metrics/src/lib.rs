//! # Hydra Metrics
//!
//! Prometheus metric families for the gateway and the listener that exposes
//! them. All families live in one dedicated [`prometheus::Registry`] owned by
//! [`GatewayMetrics`]; every component receives an `Arc<GatewayMetrics>` and
//! records through it. Metric emission is a best-effort side channel: nothing
//! here can fail after construction.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod server;

pub use server::MetricsServer;

use hydra_core::{Error, Result};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Histogram buckets for probe response times, in seconds.
const PROBE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Histogram buckets for proxied request times, in seconds. Wider than the
/// probe buckets because upstream calls may legitimately run long.
const REQUEST_BUCKETS: &[f64] = &[
    0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0,
];

/// Every metric family the gateway emits.
pub struct GatewayMetrics {
    registry: Registry,

    /// Static provider identity: `{index, provider}` -> 1
    pub provider_info: IntGaugeVec,
    /// Current provider state: `{provider, type}` where type is
    /// `healthy` or `tainted`
    pub provider_status: IntGaugeVec,
    /// Probe round-trip time: `{provider, method}`
    pub probe_duration: HistogramVec,
    /// Latest block number (or slot) observed by the probe: `{provider}`
    pub provider_block_number: IntGaugeVec,
    /// Latest gas limit observed by the probe: `{provider}`
    pub provider_gas_limit: IntGaugeVec,
    /// HTTP status of probe responses: `{provider, status}`
    pub probe_response_status: IntCounterVec,

    /// Proxied request round-trip time per attempt: `{provider, method}`
    pub request_duration: HistogramVec,
    /// Request errors handled by the failover loop: `{provider, type}`
    pub request_errors: IntCounterVec,
    /// Upstream response statuses: `{provider, status_code}`
    pub response_status: IntCounterVec,
    /// Upstream responses classified as errors: `{provider, error_message}`
    pub response_errors: IntCounterVec,
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}

impl GatewayMetrics {
    /// Build every family and register it with a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let provider_info = IntGaugeVec::new(
            Opts::new(
                "rpc_gateway_provider_info",
                "Configured providers by declaration index",
            ),
            &["index", "provider"],
        )
        .map_err(metric_err)?;

        let provider_status = IntGaugeVec::new(
            Opts::new(
                "rpc_gateway_provider_status",
                "Current provider state by type (healthy, tainted)",
            ),
            &["provider", "type"],
        )
        .map_err(metric_err)?;

        let probe_duration = HistogramVec::new(
            HistogramOpts::new(
                "rpc_gateway_healthcheck_response_duration_seconds",
                "Histogram of probe response times in seconds",
            )
            .buckets(PROBE_BUCKETS.to_vec()),
            &["provider", "method"],
        )
        .map_err(metric_err)?;

        let provider_block_number = IntGaugeVec::new(
            Opts::new(
                "rpc_gateway_provider_block_number",
                "Latest block number observed for a provider",
            ),
            &["provider"],
        )
        .map_err(metric_err)?;

        let provider_gas_limit = IntGaugeVec::new(
            Opts::new(
                "rpc_gateway_provider_gas_limit",
                "Latest gas limit observed for a provider",
            ),
            &["provider"],
        )
        .map_err(metric_err)?;

        let probe_response_status = IntCounterVec::new(
            Opts::new(
                "rpc_gateway_provider_response_status",
                "HTTP statuses returned to the prober",
            ),
            &["provider", "status"],
        )
        .map_err(metric_err)?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "rpc_gateway_request_duration_seconds",
                "Histogram of proxied request times in seconds",
            )
            .buckets(REQUEST_BUCKETS.to_vec()),
            &["provider", "method"],
        )
        .map_err(metric_err)?;

        let request_errors = IntCounterVec::new(
            Opts::new(
                "rpc_gateway_request_errors_handled_total",
                "Request errors handled by the failover loop",
            ),
            &["provider", "type"],
        )
        .map_err(metric_err)?;

        let response_status = IntCounterVec::new(
            Opts::new(
                "rpc_gateway_target_response_status_total",
                "Upstream responses by status code",
            ),
            &["provider", "status_code"],
        )
        .map_err(metric_err)?;

        let response_errors = IntCounterVec::new(
            Opts::new(
                "rpc_gateway_target_response_errors_handled_total",
                "Upstream responses classified as errors",
            ),
            &["provider", "error_message"],
        )
        .map_err(metric_err)?;

        for collector in [
            Box::new(provider_info.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(provider_status.clone()),
            Box::new(probe_duration.clone()),
            Box::new(provider_block_number.clone()),
            Box::new(provider_gas_limit.clone()),
            Box::new(probe_response_status.clone()),
            Box::new(request_duration.clone()),
            Box::new(request_errors.clone()),
            Box::new(response_status.clone()),
            Box::new(response_errors.clone()),
        ] {
            registry.register(collector).map_err(metric_err)?;
        }

        Ok(Self {
            registry,
            provider_info,
            provider_status,
            probe_duration,
            provider_block_number,
            provider_gas_limit,
            probe_response_status,
            request_duration,
            request_errors,
            response_status,
            response_errors,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "failed to encode metrics");
                String::new()
            })
    }
}

fn metric_err(e: prometheus::Error) -> Error {
    Error::Runtime(format!("metric registration failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_construct_and_export() {
        let metrics = GatewayMetrics::new().unwrap();

        metrics
            .response_status
            .with_label_values(&["Primary", "200"])
            .inc();
        metrics
            .provider_block_number
            .with_label_values(&["Primary"])
            .set(19_000_000);
        metrics
            .request_duration
            .with_label_values(&["Primary", "POST"])
            .observe(0.042);

        let text = metrics.export();
        assert!(text.contains("rpc_gateway_target_response_status_total"));
        assert!(text.contains("rpc_gateway_provider_block_number"));
        assert!(text.contains("Primary"));
    }

    #[test]
    fn test_error_counters_accumulate() {
        let metrics = GatewayMetrics::new().unwrap();

        for _ in 0..3 {
            metrics
                .request_errors
                .with_label_values(&["Backup", "rerouted"])
                .inc();
        }

        assert_eq!(
            metrics
                .request_errors
                .with_label_values(&["Backup", "rerouted"])
                .get(),
            3
        );
    }
}
