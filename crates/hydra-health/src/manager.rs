//! Probe aggregation and healthy-target selection

use crate::probe::Probe;
use hydra_core::{GatewayConfig, Result};
use hydra_metrics::GatewayMetrics;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How often the manager republishes healthy/tainted gauges.
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Owns one probe per configured target and answers the only question the
/// failover proxy ever asks: "give me an eligible index, excluding these".
///
/// A probe's index is its declaration order in the configuration; that index
/// is the identity carried in each request's visited set.
#[derive(Debug)]
pub struct HealthManager {
    probes: Vec<Arc<Probe>>,
    enable_randomization: bool,
    metrics: Arc<GatewayMetrics>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthManager {
    /// Build one probe per target, in declaration order.
    pub fn new(config: &GatewayConfig, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let probes = config
            .targets
            .iter()
            .map(|target| {
                Probe::new(target, &config.health_checks, config.solana, Arc::clone(&metrics))
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            probes,
            enable_randomization: config.proxy.enable_randomization,
            metrics,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Launch every probe plus the status reporter.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;

        for (index, probe) in self.probes.iter().enumerate() {
            let index_label = index.to_string();
            self.metrics
                .provider_info
                .with_label_values(&[index_label.as_str(), probe.name()])
                .set(1);

            tasks.push(tokio::spawn(
                Arc::clone(probe).run(self.shutdown.subscribe()),
            ));
        }

        let probes = self.probes.clone();
        let metrics = Arc::clone(&self.metrics);
        let mut shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => report_status(&probes, &metrics),
                    _ = shutdown.recv() => {
                        debug!("status reporter stopping");
                        return;
                    }
                }
            }
        }));

        info!(probes = self.probes.len(), "health manager started");
    }

    /// Stop every probe and wait for the tasks to exit.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            if let Err(e) = task.await {
                error!(error = %e, "probe task failed to stop cleanly");
            }
        }

        info!("health manager stopped");
    }

    /// Number of configured providers.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether no providers are configured.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// All probes, in declaration order.
    pub fn probes(&self) -> &[Arc<Probe>] {
        &self.probes
    }

    /// Pick an eligible provider index, considering every provider.
    pub fn next_healthy_index(&self) -> Option<usize> {
        self.next_healthy_index_excluding(&[])
    }

    /// Pick an eligible provider index outside `excluded`.
    ///
    /// Starts at a uniformly random origin and walks indices modulo the
    /// provider count, returning the first that is healthy, untainted,
    /// enabled and not excluded. The random origin spreads load evenly; the
    /// walk makes the choice deterministic once only one provider qualifies.
    pub fn next_healthy_index_excluding(&self, excluded: &[usize]) -> Option<usize> {
        let total = self.probes.len();
        if total == 0 {
            error!("no targets configured");
            return None;
        }

        let origin = if self.enable_randomization {
            rand::thread_rng().gen_range(0..total)
        } else {
            0
        };

        for delta in 0..total {
            let index = (origin + delta) % total;
            if excluded.contains(&index) {
                continue;
            }
            if self.probes[index].is_eligible() {
                return Some(index);
            }
        }

        error!("no more healthy targets");
        None
    }

    /// Look up a probe by provider name.
    pub fn target_by_name(&self, name: &str) -> Option<&Arc<Probe>> {
        self.probes.iter().find(|probe| probe.name() == name)
    }

    /// Declaration index of a named provider.
    pub fn target_index_by_name(&self, name: &str) -> Option<usize> {
        self.probes.iter().position(|probe| probe.name() == name)
    }

    /// Latest block number observed for a named provider.
    pub fn block_number_by_name(&self, name: &str) -> Option<u64> {
        self.target_by_name(name).map(|probe| probe.block_number())
    }

    /// Manually degrade a provider until its next successful probe.
    pub fn taint_target(&self, name: &str) {
        match self.target_by_name(name) {
            Some(probe) => probe.taint(),
            None => error!(name, "tried to taint a non-existing target"),
        }
    }
}

fn report_status(probes: &[Arc<Probe>], metrics: &GatewayMetrics) {
    for probe in probes {
        metrics
            .provider_status
            .with_label_values(&[probe.name(), "healthy"])
            .set(i64::from(probe.is_healthy()));
        metrics
            .provider_status
            .with_label_values(&[probe.name(), "tainted"])
            .set(i64::from(probe.is_tainted()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_core::{
        HttpConnection, ServerConfig, TargetConfig, TargetConnection,
    };

    fn config(names: &[&str]) -> GatewayConfig {
        GatewayConfig {
            proxy: ServerConfig {
                port: "3000".into(),
                upstream_timeout: Duration::from_secs(1),
                enable_randomization: true,
            },
            targets: names
                .iter()
                .map(|name| TargetConfig {
                    name: (*name).into(),
                    connection: TargetConnection {
                        http: HttpConnection {
                            url: "http://127.0.0.1:1".into(),
                            compression: false,
                            disable_keep_alives: false,
                        },
                        ws: None,
                    },
                })
                .collect(),
            health_checks: Default::default(),
            exceptions: Vec::new(),
            solana: false,
            metrics: Default::default(),
            admin: None,
        }
    }

    fn manager(names: &[&str]) -> HealthManager {
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        HealthManager::new(&config(names), metrics).unwrap()
    }

    /// Average selection result over 128 trials, as in the distribution
    /// properties of the selection contract.
    fn accumulated(f: impl Fn() -> usize) -> f64 {
        let attempts = 128;
        (0..attempts).map(|_| f() as f64).sum::<f64>() / attempts as f64
    }

    #[test]
    fn test_selection_is_roughly_uniform() {
        let manager = manager(&["Primary", "StandBy"]);

        let acc = accumulated(|| manager.next_healthy_index().unwrap());
        assert!(
            (acc - 0.5).abs() < 0.25,
            "average index {acc} too far from 0.5"
        );
    }

    #[test]
    fn test_taint_pins_selection_to_the_other_target() {
        let manager = manager(&["Primary", "StandBy"]);

        manager.taint_target("Primary");

        let acc = accumulated(|| manager.next_healthy_index().unwrap());
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn test_selection_excluding() {
        let manager = manager(&["Primary", "Backup"]);

        let both = accumulated(|| manager.next_healthy_index_excluding(&[]).unwrap());
        let no_first = accumulated(|| manager.next_healthy_index_excluding(&[0]).unwrap());
        let no_second = accumulated(|| manager.next_healthy_index_excluding(&[1]).unwrap());

        assert!((both - 0.5).abs() < 0.25);
        assert_eq!(no_first, 1.0);
        assert_eq!(no_second, 0.0);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let manager = manager(&["Primary", "Backup"]);

        assert_eq!(manager.next_healthy_index_excluding(&[0, 1]), None);
    }

    #[test]
    fn test_unhealthy_targets_are_skipped() {
        let manager = manager(&["Primary", "Backup"]);

        // Default failureThreshold is 2.
        let primary = &manager.probes()[0];
        primary.record_failure();
        primary.record_failure();
        assert!(!primary.is_healthy());

        let acc = accumulated(|| manager.next_healthy_index().unwrap());
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn test_all_ineligible_returns_none() {
        let manager = manager(&["Primary"]);

        manager.taint_target("Primary");
        assert_eq!(manager.next_healthy_index(), None);
    }

    #[test]
    fn test_selected_index_is_always_eligible_and_not_excluded() {
        let manager = manager(&["A", "B", "C", "D"]);
        manager.taint_target("B");

        for _ in 0..128 {
            let index = manager.next_healthy_index_excluding(&[3]).unwrap();
            assert_ne!(index, 1, "tainted index selected");
            assert_ne!(index, 3, "excluded index selected");
            assert!(manager.probes()[index].is_eligible());
        }
    }

    #[test]
    fn test_fixed_origin_without_randomization() {
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let mut cfg = config(&["Primary", "Backup"]);
        cfg.proxy.enable_randomization = false;
        let manager = HealthManager::new(&cfg, metrics).unwrap();

        let acc = accumulated(|| manager.next_healthy_index().unwrap());
        assert_eq!(acc, 0.0, "declaration order wins when randomization is off");

        manager.probes()[0].taint();
        let acc = accumulated(|| manager.next_healthy_index().unwrap());
        assert_eq!(acc, 1.0);
    }

    #[test]
    fn test_target_lookups() {
        let manager = manager(&["Primary", "Backup"]);

        assert_eq!(manager.target_index_by_name("Backup"), Some(1));
        assert!(manager.target_by_name("Primary").is_some());
        assert!(manager.target_by_name("Nope").is_none());
        assert_eq!(manager.block_number_by_name("Primary"), Some(0));
        assert_eq!(manager.block_number_by_name("Nope"), None);

        // Tainting an unknown name must not panic.
        manager.taint_target("Nope");
    }
}
