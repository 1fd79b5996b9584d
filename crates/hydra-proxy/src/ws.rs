//! WebSocket passthrough
//!
//! Upgrade requests are pinned to a single provider: the upstream connection
//! is established first (retrying other providers while that is still
//! possible), then the client upgrade completes and frames are pumped both
//! ways until either side closes. After the upgrade there are no retries.

use crate::failover::FailoverProxy;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::{debug, error, info, warn};

pub(crate) async fn handle_upgrade<B>(
    proxy: &FailoverProxy,
    mut req: Request<B>,
) -> Response<Full<Bytes>> {
    let Some(key) = req
        .headers()
        .get(header::SEC_WEBSOCKET_KEY)
        .map(|key| derive_accept_key(key.as_bytes()))
    else {
        return plain_response(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key");
    };

    // Provider selection happens before the client upgrade, so a dead
    // provider can still be skipped here.
    let mut visited: Vec<usize> = Vec::new();
    let upstream = loop {
        let Some(index) = proxy.health().next_healthy_index_excluding(&visited) else {
            return plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available");
        };

        let target = &proxy.targets()[index];
        let Some(ws_url) = target.ws_url() else {
            debug!(provider = target.name(), "target has no WebSocket endpoint");
            visited.push(index);
            continue;
        };

        match connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                info!(provider = target.name(), "WebSocket upstream connected");
                break stream;
            }
            Err(e) => {
                warn!(provider = target.name(), error = %e, "WebSocket dial failed");
                visited.push(index);
            }
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut req);

    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                error!(error = %e, "client upgrade failed");
                return;
            }
        };

        let client =
            WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

        pump(client, upstream).await;
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, key)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Full::new(Bytes::new()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
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

/// Forward frames both ways until either side closes or errors.
async fn pump<C, U>(client: WebSocketStream<C>, upstream: WebSocketStream<U>)
where
    C: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    U: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut client_write, mut client_read) = client.split();
    let (mut upstream_write, mut upstream_read) = upstream.split();

    let client_to_upstream = async {
        while let Some(message) = client_read.next().await {
            match message {
                Ok(message) => {
                    if let Err(e) = upstream_write.send(message).await {
                        debug!(error = %e, "failed to send to upstream");
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "client read error");
                    break;
                }
            }
        }
    };

    let upstream_to_client = async {
        while let Some(message) = upstream_read.next().await {
            match message {
                Ok(message) => {
                    if let Err(e) = client_write.send(message).await {
                        debug!(error = %e, "failed to send to client");
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "upstream read error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => debug!("client side closed"),
        _ = upstream_to_client => debug!("upstream side closed"),
    }

    info!("WebSocket connection closed");
}
