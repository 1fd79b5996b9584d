//! The failover retry loop
//!
//! Serves every inbound request by forwarding it to a healthy provider and
//! retrying against different providers on classified failure, until the
//! response can be served, the client goes away, or every provider has been
//! visited.

use crate::classify::{classify_status, scan_exceptions};
use crate::rewrite::{client_headers, upstream_headers, ReplayableBody};
use crate::target::HttpTarget;
use crate::ws;
use bytes::Bytes;
use http::request::Parts;
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hydra_core::{Error, GatewayConfig, Result};
use hydra_health::HealthManager;
use hydra_metrics::GatewayMetrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The failover reverse proxy. Stateless across requests: everything
/// per-request lives on the handler's stack.
#[derive(Debug)]
pub struct FailoverProxy {
    targets: Vec<HttpTarget>,
    health: Arc<HealthManager>,
    exceptions: Vec<hydra_core::Exception>,
    metrics: Arc<GatewayMetrics>,
}

impl FailoverProxy {
    /// Build one forwarder per target. Configuration problems (bad URLs)
    /// are fatal here.
    pub fn new(
        config: &GatewayConfig,
        health: Arc<HealthManager>,
        metrics: Arc<GatewayMetrics>,
    ) -> Result<Self> {
        let targets = config
            .targets
            .iter()
            .map(|target| HttpTarget::new(target, &config.proxy, config.solana))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            targets,
            health,
            exceptions: config.exceptions.clone(),
            metrics,
        })
    }

    /// The health manager this proxy selects through.
    pub fn health(&self) -> &Arc<HealthManager> {
        &self.health
    }

    /// All targets, in declaration order.
    pub(crate) fn targets(&self) -> &[HttpTarget] {
        &self.targets
    }

    /// Name of the provider the selector would currently pick. Admin
    /// introspection only.
    pub fn next_target_name(&self) -> Option<&str> {
        self.health
            .next_healthy_index()
            .map(|index| self.targets[index].name())
    }

    /// Serve one inbound request end to end.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: std::fmt::Display,
    {
        if req.headers().contains_key(header::UPGRADE) {
            return ws::handle_upgrade(self, req).await;
        }

        let (parts, body) = req.into_parts();

        let raw = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                debug!(error = %e, "failed to read client body");
                return error_response(StatusCode::BAD_REQUEST, "cannot read body");
            }
        };

        let body = match ReplayableBody::capture(&parts.headers, raw) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "cannot process request");
                return error_response(e.to_status_code(), "cannot process request");
            }
        };

        self.failover_loop(&parts, &body).await
    }

    /// The retry loop proper. At most one upstream is contacted at a time;
    /// each failed attempt adds its provider index to the visited set before
    /// the next selection.
    async fn failover_loop(&self, parts: &Parts, body: &ReplayableBody) -> Response<Full<Bytes>> {
        let mut visited: Vec<usize> = Vec::new();
        let mut guard = DisconnectGuard::new(&self.metrics);

        loop {
            let Some(index) = self.health.next_healthy_index_excluding(&visited) else {
                guard.disarm();
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available");
            };

            let target = &self.targets[index];
            guard.arm(target.name());

            let started = Instant::now();
            let outcome = self.attempt(target, parts, body).await;

            self.metrics
                .request_duration
                .with_label_values(&[target.name(), parts.method.as_str()])
                .observe(started.elapsed().as_secs_f64());

            match outcome {
                Ok(response) => {
                    guard.disarm();
                    return response;
                }
                Err(e) => {
                    warn!(
                        provider = target.name(),
                        error = %e,
                        "handling a failed request"
                    );
                    self.metrics
                        .request_errors
                        .with_label_values(&[target.name(), "rerouted"])
                        .inc();
                    visited.push(index);
                }
            }
        }
    }

    /// One upstream attempt: forward, classify, inspect, repackage.
    async fn attempt(
        &self,
        target: &HttpTarget,
        parts: &Parts,
        body: &ReplayableBody,
    ) -> Result<Response<Full<Bytes>>> {
        let (bytes, stripped_encoding) = body.for_target(target.accepts_compression());
        let headers = upstream_headers(&parts.headers, stripped_encoding);

        let response = target.forward(&parts.method, headers, bytes).await?;

        let status = response.status();
        self.metrics
            .response_status
            .with_label_values(&[target.name(), status.as_str()])
            .inc();

        if let Some(tag) = classify_status(status) {
            warn!(provider = target.name(), status = %status, tag);
            self.metrics
                .response_errors
                .with_label_values(&[target.name(), tag])
                .inc();
            return Err(Error::Upstream(tag.to_string()));
        }

        let response_headers = response.headers().clone();
        let response_body = response
            .bytes()
            .await
            .map_err(|e| Error::Upstream(format!("cannot read response body: {e}")))?;

        if let Some(exception) = scan_exceptions(
            &response_body,
            &response_headers,
            target.accepts_compression(),
            &self.exceptions,
        )? {
            let message = exception.message();
            warn!(provider = target.name(), message, "exception rule matched");
            self.metrics
                .response_errors
                .with_label_values(&[target.name(), message])
                .inc();
            return Err(Error::Upstream(message.to_string()));
        }

        let mut builder = Response::builder().status(status);
        if let Some(headers) = builder.headers_mut() {
            *headers = client_headers(&response_headers);
        }

        builder
            .body(Full::new(response_body))
            .map_err(Error::from)
    }
}

/// Records `client_closed_connection` when the request future is dropped
/// mid-attempt, which is how a client disconnect manifests here: the server
/// drops the service future, no further retries can run, and this guard is
/// the only thing that still observes the event.
struct DisconnectGuard<'a> {
    metrics: &'a GatewayMetrics,
    provider: Option<String>,
}

impl<'a> DisconnectGuard<'a> {
    fn new(metrics: &'a GatewayMetrics) -> Self {
        Self {
            metrics,
            provider: None,
        }
    }

    fn arm(&mut self, provider: &str) {
        self.provider = Some(provider.to_string());
    }

    fn disarm(&mut self) {
        self.provider = None;
    }
}

impl Drop for DisconnectGuard<'_> {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            self.metrics
                .request_errors
                .with_label_values(&[provider.as_str(), "client_closed_connection"])
                .inc();
        }
    }
}

fn error_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(message.as_bytes())))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = status;
            response
        })
}
