//! Metrics and liveness listener
//!
//! Serves `GET /metrics` (Prometheus text format) and `GET /healthz` on a
//! dedicated port, away from proxied traffic.

use crate::GatewayMetrics;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::sync::broadcast;

/// The metrics/healthz listener.
#[derive(Debug)]
pub struct MetricsServer {
    metrics: Arc<GatewayMetrics>,
    port: u16,
}

impl MetricsServer {
    /// Create a server that exposes the given registry on `port`.
    pub fn new(metrics: Arc<GatewayMetrics>, port: u16) -> Self {
        Self { metrics, port }
    }

    /// Accept connections until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> hydra_core::Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| hydra_core::Error::Runtime(format!("failed to bind {addr}: {e}")))?;

        tracing::info!(listen = %addr, "metrics server starting");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "metrics accept failed");
                            continue;
                        }
                    };

                    let metrics = Arc::clone(&self.metrics);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let metrics = Arc::clone(&metrics);
                            async move { handle(req, &metrics) }
                        });

                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            tracing::debug!(error = %e, "metrics connection error");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("metrics server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

fn handle<B>(req: Request<B>, metrics: &GatewayMetrics) -> Result<Response<Full<Bytes>>, http::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Full::new(Bytes::from(metrics.export()))),
        (&Method::GET, "/healthz") => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from_static(b"OK"))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new())),
    }
}
