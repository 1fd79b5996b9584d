//! Per-target upstream transport

use bytes::Bytes;
use http::header::HeaderMap;
use http::Method;
use hydra_core::{Error, Result, ServerConfig, TargetConfig};
use std::time::Duration;
use url::Url;

/// One configured upstream with its dedicated HTTP client, so per-target
/// transport flags (keep-alive, response deadline) actually apply per target.
#[derive(Debug)]
pub struct HttpTarget {
    config: TargetConfig,
    url: Url,
    ws_url: Option<Url>,
    client: reqwest::Client,
}

impl HttpTarget {
    /// Build the forwarder for one target. A malformed URL is fatal here,
    /// at construction.
    pub fn new(config: &TargetConfig, proxy: &ServerConfig, solana: bool) -> Result<Self> {
        let url = Url::parse(&config.connection.http.url).map_err(|e| {
            Error::Config(format!("target '{}' has an invalid URL: {e}", config.name))
        })?;

        // In Solana mode every target speaks WebSocket; fall back to the
        // HTTP endpoint when no dedicated WS URL is configured.
        let ws_url = match &config.connection.ws {
            Some(ws) => Some(to_ws_url(&ws.url, &config.name)?),
            None if solana => Some(to_ws_url(&config.connection.http.url, &config.name)?),
            None => None,
        };

        let mut builder = reqwest::Client::builder()
            .timeout(proxy.upstream_timeout)
            .connect_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(100)
            .redirect(reqwest::redirect::Policy::none());

        if config.connection.http.disable_keep_alives {
            builder = builder.pool_max_idle_per_host(0);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("client for target '{}': {e}", config.name)))?;

        Ok(Self {
            config: config.clone(),
            url,
            ws_url,
            client,
        })
    }

    /// Provider name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Whether the provider accepts compressed request bodies unmodified.
    pub fn accepts_compression(&self) -> bool {
        self.config.connection.http.compression
    }

    /// WebSocket endpoint, when one exists for this target.
    pub fn ws_url(&self) -> Option<&Url> {
        self.ws_url.as_ref()
    }

    /// Send one attempt. The destination is the target's own URL: the
    /// gateway is mounted as a catch-all, and the provider's path (with any
    /// API key in it) is what the request must hit.
    pub async fn forward(
        &self,
        method: &Method,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        self.client
            .request(method.clone(), self.url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout
                } else {
                    Error::Upstream(e.to_string())
                }
            })
    }
}

/// Map an endpoint URL onto the WebSocket scheme tungstenite dials.
fn to_ws_url(raw: &str, target_name: &str) -> Result<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| Error::Config(format!("target '{target_name}' has an invalid WS URL: {e}")))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => {
            return Err(Error::Config(format!(
                "target '{target_name}' WS URL scheme '{other}' is not supported"
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| Error::Config(format!("target '{target_name}': cannot rewrite WS scheme")))?;

    Ok(url)
}
