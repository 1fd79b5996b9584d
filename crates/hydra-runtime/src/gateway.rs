//! Gateway assembly: config → health manager → proxy → listeners

use crate::shutdown::ShutdownSignal;
use crate::timeout::TimeoutStream;
use hydra_core::{Error, GatewayConfig, Result};
use hydra_health::HealthManager;
use hydra_metrics::GatewayMetrics;
use hydra_proxy::FailoverProxy;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Deadline for a client to finish sending its request headers.
const READ_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-level progress deadlines: any read or write that stalls this
/// long closes the connection.
const READ_TIMEOUT: Duration = Duration::from_secs(15);
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

/// The assembled gateway: health manager, failover proxy and the listeners
/// that feed it.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    health: Arc<HealthManager>,
    proxy: Arc<FailoverProxy>,
    shutdown: ShutdownSignal,
}

impl Gateway {
    /// Wire the components. Configuration errors are fatal here.
    pub fn new(config: GatewayConfig, metrics: Arc<GatewayMetrics>) -> Result<Self> {
        let health = Arc::new(HealthManager::new(&config, Arc::clone(&metrics))?);
        let proxy = Arc::new(FailoverProxy::new(
            &config,
            Arc::clone(&health),
            metrics,
        )?);

        Ok(Self {
            config,
            health,
            proxy,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// The shutdown signal that stops this gateway.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// The health manager, for admin access.
    pub fn health(&self) -> &Arc<HealthManager> {
        &self.health
    }

    /// The failover proxy, for admin access.
    pub fn proxy(&self) -> &Arc<FailoverProxy> {
        &self.proxy
    }

    /// Run until the shutdown signal fires, then stop the health manager.
    pub async fn run(&self) -> Result<()> {
        info!("starting rpc gateway");

        let port: u16 = self
            .config
            .proxy
            .port
            .parse()
            .map_err(|_| Error::Config(format!("invalid proxy port '{}'", self.config.proxy.port)))?;

        self.health.start().await;

        let mut listeners = vec![("http", bind(port).await?)];

        // Solana deployments speak WebSocket on a dedicated port right above
        // the HTTP one; upgrades arriving there ride the same handler.
        if self.config.solana {
            listeners.push(("ws", bind(port + 1).await?));
        }

        let mut accept_loops = Vec::new();
        for (kind, listener) in listeners {
            info!(
                kind,
                listen = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
                "starting failover proxy listener"
            );
            accept_loops.push(tokio::spawn(accept_loop(
                listener,
                Arc::clone(&self.proxy),
                self.shutdown.subscribe(),
            )));
        }

        for accept in accept_loops {
            if let Err(e) = accept.await {
                error!(error = %e, "accept loop terminated abnormally");
            }
        }

        info!("stopping rpc gateway");
        self.health.stop().await;

        Ok(())
    }
}

async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::Runtime(format!("failed to bind port {port}: {e}")))
}

/// Accept connections until shutdown; one task per connection, upgrades
/// enabled so WebSocket requests can complete their handshake.
async fn accept_loop(
    listener: TcpListener,
    proxy: Arc<FailoverProxy>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                debug!(%peer, "accepted connection");

                let proxy = Arc::clone(&proxy);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let proxy = Arc::clone(&proxy);
                        async move { Ok::<_, Infallible>(proxy.handle(req).await) }
                    });

                    let stream = TimeoutStream::new(stream, READ_TIMEOUT, WRITE_TIMEOUT);
                    let connection = hyper::server::conn::http1::Builder::new()
                        .timer(TokioTimer::new())
                        .header_read_timeout(READ_HEADER_TIMEOUT)
                        .serve_connection(TokioIo::new(stream), service)
                        .with_upgrades();

                    if let Err(e) = connection.await {
                        debug!(error = %e, "connection error");
                    }
                });
            }
            _ = shutdown.recv() => {
                info!("listener shutting down");
                return;
            }
        }
    }
}
