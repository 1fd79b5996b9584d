//! The administration listener and its routes

use crate::auth::{issue_token_payload, verify_bearer};
use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hydra_core::AdminConfig;
use hydra_health::HealthManager;
use hydra_proxy::FailoverProxy;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// One provider row in the targets listing.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    name: String,
    disabled: bool,
    block_number: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateTargetRequest {
    disabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    address: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    payload: String,
}

/// The admin API server.
#[derive(Debug)]
pub struct AdminServer {
    config: AdminConfig,
    health: Arc<HealthManager>,
    proxy: Arc<FailoverProxy>,
}

impl AdminServer {
    /// Create an admin server over the gateway's live components.
    pub fn new(
        config: AdminConfig,
        health: Arc<HealthManager>,
        proxy: Arc<FailoverProxy>,
    ) -> Self {
        Self {
            config,
            health,
            proxy,
        }
    }

    /// Accept connections until the shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> hydra_core::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| hydra_core::Error::Runtime(format!("failed to bind {addr}: {e}")))?;

        info!(listen = %addr, "administration server starting");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, _) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "admin accept failed");
                            continue;
                        }
                    };

                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let server = Arc::clone(&server);
                            async move {
                                Ok::<_, std::convert::Infallible>(server.route(req).await)
                            }
                        });

                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            warn!(error = %e, "admin connection error");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("administration server shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn route(&self, req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
        let path = req.uri().path().to_string();
        let Some(route) = path.strip_prefix(self.config.base_path.as_str()) else {
            return plain(StatusCode::NOT_FOUND, "not found");
        };

        match (req.method().clone(), route) {
            (Method::POST, "/admin/auth/token") => self.issue_token(req).await,
            (Method::GET, "/admin/targets") => match self.authorize(&req) {
                Ok(()) => self.list_targets(),
                Err(response) => response,
            },
            (Method::POST, route) if route.starts_with("/admin/targets/") => {
                match self.authorize(&req) {
                    Ok(()) => {
                        let name = route.trim_start_matches("/admin/targets/").to_string();
                        self.update_target(&name, req).await
                    }
                    Err(response) => response,
                }
            }
            _ => {
                warn!(path = %path, "admin route not found");
                plain(StatusCode::NOT_FOUND, "not found")
            }
        }
    }

    fn authorize(&self, req: &Request<hyper::body::Incoming>) -> Result<(), Response<Full<Bytes>>> {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let Some(auth) = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Err(plain(
                StatusCode::UNAUTHORIZED,
                "missing Authorization header",
            ));
        };

        match verify_bearer(auth, host, &self.config) {
            Ok(_) => Ok(()),
            Err("address is not an admin") => {
                warn!("admin request from non-admin signer");
                Err(plain(StatusCode::FORBIDDEN, "forbidden"))
            }
            Err(reason) => {
                warn!(reason, "admin request rejected");
                Err(plain(StatusCode::UNAUTHORIZED, "unauthorized"))
            }
        }
    }

    async fn issue_token(&self, req: Request<hyper::body::Incoming>) -> Response<Full<Bytes>> {
        let host = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let Ok(body) = req.into_body().collect().await else {
            return plain(StatusCode::BAD_REQUEST, "cannot read body");
        };
        let Ok(request) = serde_json::from_slice::<TokenRequest>(&body.to_bytes()) else {
            return plain(StatusCode::BAD_REQUEST, "bad request");
        };

        match issue_token_payload(&host, &request.address) {
            Ok(payload) => json(StatusCode::OK, &TokenResponse { payload }),
            Err(e) => {
                warn!(error = %e, "failed to encode token payload");
                plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }

    fn list_targets(&self) -> Response<Full<Bytes>> {
        let targets: Vec<TargetInfo> = self
            .health
            .probes()
            .iter()
            .map(|probe| TargetInfo {
                name: probe.name().to_string(),
                disabled: probe.is_disabled(),
                block_number: probe.block_number(),
            })
            .collect();

        json(StatusCode::OK, &targets)
    }

    async fn update_target(
        &self,
        name: &str,
        req: Request<hyper::body::Incoming>,
    ) -> Response<Full<Bytes>> {
        if name.is_empty() {
            return plain(StatusCode::BAD_REQUEST, "target name not provided");
        }

        let Some(probe) = self.health.target_by_name(name) else {
            return plain(StatusCode::NOT_FOUND, "target not found");
        };
        let probe = Arc::clone(probe);

        let Ok(body) = req.into_body().collect().await else {
            return plain(StatusCode::BAD_REQUEST, "cannot read body");
        };
        let Ok(request) = serde_json::from_slice::<UpdateTargetRequest>(&body.to_bytes()) else {
            return plain(StatusCode::BAD_REQUEST, "failed to decode JSON body");
        };
        let Some(disabled) = request.disabled else {
            return plain(StatusCode::BAD_REQUEST, "field 'disabled' is missing");
        };

        probe.set_disabled(disabled);
        info!(
            target = name,
            disabled,
            next = self.proxy.next_target_name().unwrap_or("<none>"),
            "target updated"
        );

        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(message.as_bytes())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))),
        Err(e) => {
            warn!(error = %e, "failed to serialize response");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
