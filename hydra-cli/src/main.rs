//! Hydra CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use hydra_admin::AdminServer;
use hydra_metrics::{GatewayMetrics, MetricsServer};
use hydra_runtime::{Gateway, SignalHandler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hydra")]
#[command(about = "Failover JSON-RPC gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yml")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, log_level } => {
            init_tracing(&log_level)?;

            tracing::info!(config = %config.display(), "starting hydra");

            let config = hydra_config::load(config)?;

            let metrics = Arc::new(GatewayMetrics::new()?);
            let gateway = Arc::new(Gateway::new(config.clone(), Arc::clone(&metrics))?);
            let shutdown = gateway.shutdown_signal();

            tokio::spawn(SignalHandler::new(shutdown.clone()).run());

            let metrics_server = MetricsServer::new(metrics, config.metrics.port);
            let metrics_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                if let Err(e) = metrics_server.run(metrics_shutdown).await {
                    tracing::error!(error = %e, "metrics server failed");
                }
            });

            if let Some(admin_config) = config.admin.clone() {
                let admin = Arc::new(AdminServer::new(
                    admin_config,
                    Arc::clone(gateway.health()),
                    Arc::clone(gateway.proxy()),
                ));
                let admin_shutdown = shutdown.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = admin.run(admin_shutdown).await {
                        tracing::error!(error = %e, "administration server failed");
                    }
                });
            }

            gateway.run().await?;
        }

        Commands::Validate { config } => {
            hydra_config::load(&config)?;
            println!("{} is valid", config.display());
        }

        Commands::Version => {
            println!("hydra {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
