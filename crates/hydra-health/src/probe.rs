//! Per-provider health probing

use async_trait::async_trait;
use hydra_core::{Error, HealthCheckConfig, Result, TargetConfig};
use hydra_metrics::GatewayMetrics;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What a successful probe observed at the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeObservation {
    /// Freshness measure: block number (Ethereum) or slot height (Solana)
    pub block_number: u64,
    /// Gas limit of the latest block, when the chain reports one
    pub gas_limit: Option<u64>,
}

/// Chain-specific probe content: the request to send and how to read the
/// answer. The probe loop itself is chain-agnostic.
#[async_trait]
pub trait ChainProbe: Send + Sync + std::fmt::Debug {
    /// JSON-RPC method name, used as the duration histogram label.
    fn method(&self) -> &'static str;

    /// Request body POSTed to the provider.
    fn request_body(&self) -> Value;

    /// Extract the observation from a decoded JSON-RPC response.
    fn parse(&self, body: &Value) -> Result<ProbeObservation>;
}

/// Ethereum-style probe: fetch the latest block header.
#[derive(Debug, Default)]
pub struct EthereumProbe;

#[async_trait]
impl ChainProbe for EthereumProbe {
    fn method(&self) -> &'static str {
        "eth_getBlockByNumber"
    }

    fn request_body(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_getBlockByNumber",
            "params": ["latest", false],
            "id": 1,
        })
    }

    fn parse(&self, body: &Value) -> Result<ProbeObservation> {
        let result = body
            .get("result")
            .ok_or_else(|| Error::Upstream("probe response has no result".into()))?;

        let block_number = result
            .get("number")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64)
            .ok_or_else(|| Error::Upstream("block number missing or unparseable".into()))?;

        // gasLimit is informational; a provider omitting it is not a failure.
        let gas_limit = result
            .get("gasLimit")
            .and_then(Value::as_str)
            .and_then(parse_hex_u64);

        Ok(ProbeObservation {
            block_number,
            gas_limit,
        })
    }
}

/// Solana-style probe: fetch the current slot height.
#[derive(Debug, Default)]
pub struct SolanaProbe;

#[async_trait]
impl ChainProbe for SolanaProbe {
    fn method(&self) -> &'static str {
        "getSlot"
    }

    fn request_body(&self) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getSlot",
        })
    }

    fn parse(&self, body: &Value) -> Result<ProbeObservation> {
        let slot = body
            .get("result")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::Upstream("slot missing or unparseable".into()))?;

        Ok(ProbeObservation {
            block_number: slot,
            gas_limit: None,
        })
    }
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

/// Health state of one provider, owned and written by its probe task.
///
/// A provider starts out healthy so the gateway can serve traffic before the
/// first probe completes; the first few probe results correct the optimism if
/// it was misplaced.
#[derive(Debug)]
pub struct Probe {
    name: String,
    url: String,
    interval: Duration,
    failure_threshold: u32,
    success_threshold: u32,
    chain: Box<dyn ChainProbe>,
    client: reqwest::Client,
    metrics: Arc<GatewayMetrics>,

    healthy: AtomicBool,
    tainted: AtomicBool,
    disabled: AtomicBool,
    block_number: AtomicU64,
    gas_limit: AtomicU64,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
}

impl Probe {
    /// Build a probe for one target. Fails only on client construction.
    pub fn new(
        target: &TargetConfig,
        config: &HealthCheckConfig,
        solana: bool,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        let chain: Box<dyn ChainProbe> = if solana {
            Box::new(SolanaProbe)
        } else {
            Box::new(EthereumProbe)
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("probe client for '{}': {e}", target.name)))?;

        Ok(Self {
            name: target.name.clone(),
            url: target.connection.http.url.clone(),
            interval: config.interval,
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            chain,
            client,
            metrics,
            healthy: AtomicBool::new(true),
            tainted: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            block_number: AtomicU64::new(0),
            gas_limit: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
        })
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the provider currently passes its probes.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Whether the provider carries a manual taint.
    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::Acquire)
    }

    /// Whether an operator has disabled the provider.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Manually exclude the provider from selection until the next
    /// successful probe.
    pub fn taint(&self) {
        if !self.tainted.swap(true, Ordering::AcqRel) {
            warn!(provider = %self.name, "provider tainted");
        }
    }

    /// Toggle operator exclusion. Unlike a taint, only another call to this
    /// method clears it.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
        info!(provider = %self.name, disabled, "provider toggled");
    }

    /// Latest block number (or slot) observed.
    pub fn block_number(&self) -> u64 {
        self.block_number.load(Ordering::Acquire)
    }

    /// Latest gas limit observed; zero until one is seen.
    pub fn gas_limit(&self) -> u64 {
        self.gas_limit.load(Ordering::Acquire)
    }

    /// Whether the selector may route to this provider.
    pub fn is_eligible(&self) -> bool {
        self.is_healthy() && !self.is_tainted() && !self.is_disabled()
    }

    /// Probe forever: one check, then `interval` of sleep, until shutdown.
    pub(crate) async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        debug!(provider = %self.name, "probe loop starting");

        loop {
            self.check_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    debug!(provider = %self.name, "probe loop stopping");
                    return;
                }
            }
        }
    }

    /// One probe round-trip. The reqwest client enforces the configured
    /// wall-clock timeout.
    async fn check_once(&self) {
        let started = Instant::now();

        match self.dispatch().await {
            Ok(observation) => self.observe(observation, started.elapsed()),
            Err(e) => {
                warn!(provider = %self.name, error = %e, "probe failed");
                self.record_failure();
            }
        }
    }

    async fn dispatch(&self) -> Result<ProbeObservation> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.chain.request_body())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout
                } else {
                    Error::Upstream(e.to_string())
                }
            })?;

        let status = response.status();
        self.metrics
            .probe_response_status
            .with_label_values(&[self.name.as_str(), status.as_str()])
            .inc();

        if !status.is_success() {
            return Err(Error::Upstream(format!("unexpected status {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("undecodable probe response: {e}")))?;

        self.chain.parse(&body)
    }

    /// Fold a successful round-trip into the health state. A block number
    /// strictly below the last observed one means the node answered from a
    /// stale view and counts as a failure.
    pub(crate) fn observe(&self, observation: ProbeObservation, elapsed: Duration) {
        let last = self.block_number.load(Ordering::Acquire);
        if observation.block_number < last {
            warn!(
                provider = %self.name,
                last,
                observed = observation.block_number,
                "block number regressed"
            );
            self.record_failure();
            return;
        }

        self.record_success(observation);

        self.metrics
            .probe_duration
            .with_label_values(&[self.name.as_str(), self.chain.method()])
            .observe(elapsed.as_secs_f64());
    }

    pub(crate) fn record_success(&self, observation: ProbeObservation) {
        self.consecutive_failures.store(0, Ordering::Release);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;

        if successes >= self.success_threshold && !self.healthy.swap(true, Ordering::AcqRel) {
            info!(provider = %self.name, successes, "provider healthy again");
        }

        if self.tainted.swap(false, Ordering::AcqRel) {
            info!(provider = %self.name, "taint cleared");
        }

        self.block_number
            .store(observation.block_number, Ordering::Release);
        self.metrics
            .provider_block_number
            .with_label_values(&[self.name.as_str()])
            .set(observation.block_number as i64);

        if let Some(gas_limit) = observation.gas_limit {
            self.gas_limit.store(gas_limit, Ordering::Release);
            self.metrics
                .provider_gas_limit
                .with_label_values(&[self.name.as_str()])
                .set(gas_limit as i64);
        }
    }

    pub(crate) fn record_failure(&self) {
        self.consecutive_successes.store(0, Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures >= self.failure_threshold && self.healthy.swap(false, Ordering::AcqRel) {
            warn!(provider = %self.name, failures, "provider unhealthy");
        }
    }
}
