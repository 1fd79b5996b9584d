//! End-to-end failover behavior against in-process mock upstreams.

use bytes::Bytes;
use http::header;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hydra_core::{
    Exception, GatewayConfig, HealthCheckConfig, HttpConnection, MetricsConfig, ServerConfig,
    TargetConfig, TargetConnection,
};
use hydra_health::HealthManager;
use hydra_metrics::GatewayMetrics;
use hydra_proxy::FailoverProxy;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned behavior of one mock upstream.
#[derive(Debug, Clone)]
enum Behavior {
    /// Respond with the given status and a short diagnostic body
    Status(u16),
    /// Respond 200 with the given JSON body
    Ok(&'static str),
    /// Sleep, then respond with the given status
    Slow(Duration, u16),
}

struct Upstream {
    url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(http::HeaderMap, Bytes)>>>,
}

impl Upstream {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<(http::HeaderMap, Bytes)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn upstream(behavior: Behavior) -> Upstream {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits: Arc<AtomicUsize> = Arc::default();
    let requests: Arc<Mutex<Vec<(http::HeaderMap, Bytes)>>> = Arc::default();

    let task_hits = Arc::clone(&hits);
    let task_requests = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };

            let hits = Arc::clone(&task_hits);
            let requests = Arc::clone(&task_requests);
            let behavior = behavior.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let hits = Arc::clone(&hits);
                    let requests = Arc::clone(&requests);
                    let behavior = behavior.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let bytes = body.collect().await.unwrap().to_bytes();
                        hits.fetch_add(1, Ordering::SeqCst);
                        requests.lock().unwrap().push((parts.headers, bytes));

                        let response = match behavior {
                            Behavior::Status(code) => Response::builder()
                                .status(code)
                                .body(Full::new(Bytes::from_static(b"upstream error"))),
                            Behavior::Ok(body) => Response::builder()
                                .status(200)
                                .header(header::CONTENT_TYPE, "application/json")
                                .body(Full::new(Bytes::from_static(body.as_bytes()))),
                            Behavior::Slow(delay, code) => {
                                tokio::time::sleep(delay).await;
                                Response::builder()
                                    .status(code)
                                    .body(Full::new(Bytes::from_static(b"late")))
                            }
                        };

                        Ok::<_, Infallible>(response.unwrap())
                    }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Upstream {
        url: format!("http://{addr}"),
        hits,
        requests,
    }
}

fn gateway_config(targets: &[(&str, &str)], exceptions: Vec<Exception>) -> GatewayConfig {
    GatewayConfig {
        proxy: ServerConfig {
            port: "3000".into(),
            upstream_timeout: Duration::from_secs(10),
            // Declaration order keeps the scenarios deterministic.
            enable_randomization: false,
        },
        targets: targets
            .iter()
            .map(|(name, url)| TargetConfig {
                name: (*name).into(),
                connection: TargetConnection {
                    http: HttpConnection {
                        url: (*url).into(),
                        compression: false,
                        disable_keep_alives: false,
                    },
                    ws: None,
                },
            })
            .collect(),
        health_checks: HealthCheckConfig::default(),
        exceptions,
        solana: false,
        metrics: MetricsConfig::default(),
        admin: None,
    }
}

/// Probes are not started: providers begin in their optimistic healthy
/// state, which pins the scenarios to proxy behavior alone.
fn proxy_for(config: &GatewayConfig) -> (FailoverProxy, Arc<GatewayMetrics>) {
    let metrics = Arc::new(GatewayMetrics::new().unwrap());
    let health = Arc::new(HealthManager::new(config, Arc::clone(&metrics)).unwrap());
    let proxy = FailoverProxy::new(config, health, Arc::clone(&metrics)).unwrap();
    (proxy, metrics)
}

const RPC_BODY: &[u8] = br#"{"jsonrpc":"2.0","method":"eth_blockNumber","id":1}"#;

fn rpc_request() -> Request<Full<Bytes>> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(RPC_BODY)))
        .unwrap()
}

async fn body_of(response: Response<Full<Bytes>>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn errors(metrics: &GatewayMetrics, provider: &str, tag: &str) -> u64 {
    metrics
        .request_errors
        .with_label_values(&[provider, tag])
        .get()
}

#[tokio::test]
async fn test_failover_on_server_error() {
    let a = upstream(Behavior::Status(500)).await;
    let b = upstream(Behavior::Ok(r#"{"result":"ok"}"#)).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], Vec::new());
    let (proxy, metrics) = proxy_for(&config);

    let response = proxy.handle(rpc_request()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_of(response).await[..], br#"{"result":"ok"}"#);

    assert_eq!(a.hits(), 1);
    assert_eq!(b.hits(), 1);
    assert_eq!(errors(&metrics, "A", "rerouted"), 1);
    assert_eq!(errors(&metrics, "B", "rerouted"), 0);

    // Both upstreams saw the client body, byte for byte.
    assert_eq!(&a.requests()[0].1[..], RPC_BODY);
    assert_eq!(&b.requests()[0].1[..], RPC_BODY);
}

#[tokio::test]
async fn test_all_providers_down_yields_503() {
    let a = upstream(Behavior::Status(500)).await;
    let b = upstream(Behavior::Status(502)).await;
    let c = upstream(Behavior::Status(503)).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url), ("C", &c.url)], Vec::new());
    let (proxy, metrics) = proxy_for(&config);

    let response = proxy.handle(rpc_request()).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(&body_of(response).await[..], b"Service not available");

    // Every provider was visited exactly once; no infinite loop.
    assert_eq!(a.hits(), 1);
    assert_eq!(b.hits(), 1);
    assert_eq!(c.hits(), 1);
    for provider in ["A", "B", "C"] {
        assert_eq!(errors(&metrics, provider, "rerouted"), 1);
    }
}

#[tokio::test]
async fn test_rate_limited_provider_is_skipped() {
    let a = upstream(Behavior::Status(429)).await;
    let b = upstream(Behavior::Ok(r#"{"result":"0x1"}"#)).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], Vec::new());
    let (proxy, metrics) = proxy_for(&config);

    let response = proxy.handle(rpc_request()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        metrics
            .response_errors
            .with_label_values(&["A", "rate limited"])
            .get(),
        1
    );
}

#[tokio::test]
async fn test_exception_match_reroutes() {
    let a = upstream(Behavior::Ok(r#"{"error":"execution reverted"}"#)).await;
    let b = upstream(Behavior::Ok(r#"{"result":"clean"}"#)).await;

    let exceptions = vec![Exception {
        pattern: "execution reverted".into(),
        message: "revert".into(),
    }];
    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], exceptions);
    let (proxy, metrics) = proxy_for(&config);

    let response = proxy.handle(rpc_request()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_of(response).await[..], br#"{"result":"clean"}"#);

    assert_eq!(
        metrics
            .response_errors
            .with_label_values(&["A", "revert"])
            .get(),
        1
    );
    assert_eq!(errors(&metrics, "A", "rerouted"), 1);
}

#[tokio::test]
async fn test_gzip_body_is_decompressed_once_and_replayed() {
    let a = upstream(Behavior::Status(500)).await;
    let b = upstream(Behavior::Ok(r#"{"result":"ok"}"#)).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], Vec::new());
    let (proxy, _) = proxy_for(&config);

    let compressed = {
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(RPC_BODY).unwrap();
        encoder.finish().unwrap()
    };

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Full::new(Bytes::from(compressed)))
        .unwrap();

    let response = proxy.handle(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Both upstreams saw the identical decompressed body, and the
    // Content-Encoding header was dropped on the way.
    for target in [&a, &b] {
        let requests = target.requests();
        assert_eq!(requests.len(), 1);
        let (headers, body) = &requests[0];
        assert_eq!(&body[..], RPC_BODY);
        assert!(!headers.contains_key(header::CONTENT_ENCODING));
    }
}

#[tokio::test]
async fn test_empty_body_is_rejected_without_any_attempt() {
    let a = upstream(Behavior::Ok("{}")).await;

    let config = gateway_config(&[("A", &a.url)], Vec::new());
    let (proxy, metrics) = proxy_for(&config);

    // A bare GET through the catch-all carries no body to replay.
    let request = Request::builder()
        .method("GET")
        .uri("/")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = proxy.handle(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(a.hits(), 0, "no provider may be contacted");
    assert_eq!(errors(&metrics, "A", "rerouted"), 0);
}

#[tokio::test]
async fn test_corrupt_gzip_is_rejected_without_any_attempt() {
    let a = upstream(Behavior::Ok("{}")).await;

    let config = gateway_config(&[("A", &a.url)], Vec::new());
    let (proxy, _) = proxy_for(&config);

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Full::new(Bytes::from_static(b"definitely not gzip")))
        .unwrap();

    let response = proxy.handle(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(a.hits(), 0);
}

#[tokio::test]
async fn test_tainted_provider_is_never_contacted() {
    let a = upstream(Behavior::Ok(r#"{"result":"from A"}"#)).await;
    let b = upstream(Behavior::Ok(r#"{"result":"from B"}"#)).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], Vec::new());
    let (proxy, _) = proxy_for(&config);

    proxy.health().taint_target("A");

    for _ in 0..4 {
        let response = proxy.handle(rpc_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(a.hits(), 0);
    assert_eq!(b.hits(), 4);
}

#[tokio::test]
async fn test_client_disconnect_stops_retries() {
    let a = upstream(Behavior::Slow(Duration::from_secs(30), 500)).await;
    let b = upstream(Behavior::Ok(r#"{"result":"ok"}"#)).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], Vec::new());
    let (proxy, metrics) = proxy_for(&config);

    // Dropping the handler future is exactly what hyper does when the
    // client connection goes away.
    tokio::select! {
        _ = proxy.handle(rpc_request()) => panic!("slow upstream answered early"),
        _ = tokio::time::sleep(Duration::from_millis(300)) => {}
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(a.hits(), 1, "first attempt reached the slow provider");
    assert_eq!(b.hits(), 0, "no retry after the client went away");
    assert_eq!(errors(&metrics, "A", "client_closed_connection"), 1);
    assert_eq!(errors(&metrics, "A", "rerouted"), 0);
}

#[tokio::test]
async fn test_transport_error_falls_over() {
    // Nothing listens on this port.
    let dead = "http://127.0.0.1:9".to_string();
    let b = upstream(Behavior::Ok(r#"{"result":"alive"}"#)).await;

    let config = gateway_config(&[("Dead", &dead), ("B", &b.url)], Vec::new());
    let (proxy, metrics) = proxy_for(&config);

    let response = proxy.handle(rpc_request()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_of(response).await[..], br#"{"result":"alive"}"#);
    assert_eq!(errors(&metrics, "Dead", "rerouted"), 1);
}

#[tokio::test]
async fn test_upstream_response_headers_are_forwarded() {
    let a = upstream(Behavior::Ok(r#"{"result":"ok"}"#)).await;

    let config = gateway_config(&[("A", &a.url)], Vec::new());
    let (proxy, _) = proxy_for(&config);

    let response = proxy.handle(rpc_request()).await;
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
}

#[tokio::test]
async fn test_next_target_name_reports_the_single_option() {
    let a = upstream(Behavior::Ok("{}")).await;
    let b = upstream(Behavior::Ok("{}")).await;

    let config = gateway_config(&[("A", &a.url), ("B", &b.url)], Vec::new());
    let (proxy, _) = proxy_for(&config);

    proxy.health().taint_target("A");
    assert_eq!(proxy.next_target_name(), Some("B"));
}
