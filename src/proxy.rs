//! Proxy frontend.
//!
//! The listening side of the system: an HTTP/1.1 accept loop that classifies
//! each inbound message and hands it to the engine.
//!
//! - Absolute-form requests are ordinary proxied plain-HTTP traffic.
//! - `CONNECT` requests are tunnels. Targets matching the configured
//!   destination pattern are intercepted: the tunnel is upgraded, TLS is
//!   terminated with a forged certificate for the host, and the decrypted
//!   stream is served as normal requests. Everything else is relayed
//!   byte-for-byte.
//! - Origin-form requests did not come through a proxy handshake at all; they
//!   are rewritten onto the configured upstream endpoint.
//!
//! Each accepted connection runs in its own task; hyper serves requests on a
//! connection sequentially and drops in-flight work when the client goes
//! away.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::uri::Authority;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::engine::{Engine, EngineResponse};
use crate::tls::MitmAuthority;

/// Accepts connections until the listener fails, spawning one task per
/// connection.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    ca: Arc<MitmAuthority>,
) -> anyhow::Result<()> {
    tracing::info!(
        addr = %listener.local_addr()?,
        mode = %engine.config().mode,
        "proxy listening"
    );

    loop {
        let (stream, remote) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let engine = engine.clone();
        let ca = ca.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let engine = engine.clone();
                let ca = ca.clone();
                async move { Ok::<_, Infallible>(route(req, engine, ca, remote).await) }
            });

            let conn = http1::Builder::new()
                .serve_connection(io, svc)
                .with_upgrades();
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "connection ended with error");
            }
        });
    }
}

/// Classifies one inbound message.
async fn route(
    req: hyper::Request<Incoming>,
    engine: Arc<Engine>,
    ca: Arc<MitmAuthority>,
    remote: SocketAddr,
) -> EngineResponse {
    if req.method() == Method::CONNECT {
        return connect(req, engine, ca, remote).await;
    }

    if let Some(target) = req.uri().authority().cloned() {
        let scheme = req.uri().scheme_str().unwrap_or("http").to_string();
        let destination = destination_of(&target, default_port(&scheme));
        return engine
            .process(req, &scheme, &destination, &remote.to_string())
            .await;
    }

    direct(req, engine, remote).await
}

/// A request that arrived without a proxy handshake: route it to the
/// configured upstream endpoint.
async fn direct(
    req: hyper::Request<Incoming>,
    engine: Arc<Engine>,
    remote: SocketAddr,
) -> EngineResponse {
    let Some(endpoint) = engine.config().endpoint.clone() else {
        tracing::warn!("direct request received but no upstream endpoint is configured");
        return frontend_error(
            StatusCode::BAD_GATEWAY,
            "no upstream endpoint configured for direct traffic",
        );
    };
    engine
        .process(req, "http", &endpoint, &remote.to_string())
        .await
}

/// Answers a CONNECT and hands the upgraded tunnel to either the interceptor
/// or the transparent relay.
async fn connect(
    req: hyper::Request<Incoming>,
    engine: Arc<Engine>,
    ca: Arc<MitmAuthority>,
    remote: SocketAddr,
) -> EngineResponse {
    let Some(target) = req.uri().authority().cloned() else {
        return frontend_error(StatusCode::BAD_REQUEST, "CONNECT without target authority");
    };

    let intercept = engine.config().destination.is_match(target.host());
    tracing::debug!(target = %target, intercept, "tunnel requested");

    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                if intercept {
                    if let Err(err) = mitm(io, engine, ca, target, remote).await {
                        tracing::warn!(error = %err, "intercepted tunnel failed");
                    }
                } else if let Err(err) = tunnel(io, &target).await {
                    tracing::debug!(error = %err, target = %target, "tunnel closed");
                }
            }
            Err(err) => tracing::debug!(error = %err, "tunnel upgrade failed"),
        }
    });

    // The 200 releases the client into the tunnel; the spawned task picks the
    // connection up from there.
    EngineResponse::new(Full::new(Bytes::new()))
}

/// Terminates TLS inside the tunnel with a forged certificate and serves the
/// decrypted stream as ordinary requests.
async fn mitm(
    io: TokioIo<Upgraded>,
    engine: Arc<Engine>,
    ca: Arc<MitmAuthority>,
    target: Authority,
    remote: SocketAddr,
) -> anyhow::Result<()> {
    let config = ca.server_config(target.host())?;
    let tls = TlsAcceptor::from(config).accept(io).await?;
    let destination = destination_of(&target, 443);

    let svc = service_fn(move |req| {
        let engine = engine.clone();
        let destination = destination.clone();
        async move {
            Ok::<_, Infallible>(
                engine
                    .process(req, "https", &destination, &remote.to_string())
                    .await,
            )
        }
    });

    http1::Builder::new()
        .serve_connection(TokioIo::new(tls), svc)
        .await?;
    Ok(())
}

/// Relays tunnel bytes verbatim in both directions, reading until either side
/// errors or closes.
async fn tunnel(client: TokioIo<Upgraded>, target: &Authority) -> std::io::Result<()> {
    let port = target.port_u16().unwrap_or(443);
    let upstream = TcpStream::connect((target.host(), port)).await?;

    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = upstream.into_split();

    let outbound = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = client_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            upstream_write.write_all(&buf[..n]).await?;
            tracing::trace!(bytes = n, "client -> upstream");
        }
        upstream_write.shutdown().await
    };

    let inbound = async {
        let mut buf = [0u8; 8192];
        loop {
            let n = upstream_read.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            client_write.write_all(&buf[..n]).await?;
            tracing::trace!(bytes = n, "upstream -> client");
        }
        client_write.shutdown().await
    };

    tokio::try_join!(outbound, inbound)?;
    Ok(())
}

fn frontend_error(status: StatusCode, message: &str) -> EngineResponse {
    let mut response = hyper::Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

fn default_port(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

/// Host authority as it should appear in a fingerprint: the default port for
/// the scheme is dropped so tunneled and replayed forms of the same host
/// agree.
fn destination_of(authority: &Authority, default_port: u16) -> String {
    match authority.port_u16() {
        Some(port) if port != default_port => format!("{}:{port}", authority.host()),
        _ => authority.host().to_string(),
    }
}
