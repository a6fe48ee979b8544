//! Admin surface.
//!
//! A second, deliberately small listener next to the proxy port: liveness,
//! the number of recordings held, and a wipe. It is bound before the proxy
//! loop reports ready so orchestration can block on it.

use std::convert::Infallible;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::cache::Cache;

/// Serves the admin listener until it fails.
pub async fn serve(listener: TcpListener, cache: Cache) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "admin listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let cache = cache.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| handle(req, cache.clone()));
            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                tracing::debug!(error = %err, "admin connection ended with error");
            }
        });
    }
}

async fn handle(
    req: hyper::Request<Incoming>,
    cache: Cache,
) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => text(StatusCode::OK, "OK"),
        (&Method::GET, "/records") => {
            let body = serde_json::json!({ "records": cache.len() }).to_string();
            json(StatusCode::OK, body)
        }
        (&Method::DELETE, "/records") => match cache.clear() {
            Ok(()) => {
                tracing::info!("recordings wiped");
                json(StatusCode::OK, serde_json::json!({ "records": 0 }).to_string())
            }
            Err(err) => {
                tracing::error!(error = %err, "could not wipe recordings");
                text(StatusCode::INTERNAL_SERVER_ERROR, "store unavailable")
            }
        },
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

fn text(status: StatusCode, body: &str) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn json(status: StatusCode, body: String) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}
