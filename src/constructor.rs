//! Rehydrating HTTP messages from payloads.
//!
//! A [`Constructor`] is a short-lived value bound to one payload. It rebuilds
//! either side of the recorded exchange: an outgoing request suitable for the
//! upstream client, or a client-bound response. When a middleware command is
//! configured, [`Constructor::apply_middleware`] swaps the payload in place so
//! any subsequent reconstruction sees the transformed fields.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;

use crate::error::ProxyError;
use crate::middleware::{self, MiddlewareError};
use crate::payload::{Payload, RequestDetails};

/// Headers that belong to one hop, never to the recorded exchange.
pub(crate) const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Builds an outgoing request for the upstream client from recorded request
/// fields.
///
/// The request is assembled from scratch (method, URL, headers, body), which
/// is what clears any protocol-internal identifier the inbound message
/// carried; nothing of the original wire form survives to confuse the client.
/// Hop-by-hop headers, `host` and `content-length` are dropped, the client
/// regenerates them for the new connection.
pub fn outbound_request(
    client: &reqwest::Client,
    details: &RequestDetails,
) -> Result<reqwest::Request, ProxyError> {
    let scheme = if details.scheme.is_empty() {
        "http"
    } else {
        details.scheme.as_str()
    };
    let mut url = reqwest::Url::parse(&format!("{scheme}://{}", details.destination))
        .map_err(|err| ProxyError::Reconstruct(err.to_string()))?;
    url.set_path(&details.path);
    if !details.query.is_empty() {
        url.set_query(Some(&details.query));
    }

    let method = http::Method::from_bytes(details.method.as_bytes())
        .map_err(|err| ProxyError::Reconstruct(err.to_string()))?;

    let mut headers = http::HeaderMap::new();
    for (name, values) in &details.headers {
        if is_hop_by_hop(name)
            || name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = %name, "skipping unrepresentable header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => tracing::warn!(header = %name, "skipping unrepresentable header value"),
            }
        }
    }

    client
        .request(method, url)
        .headers(headers)
        .body(details.body.clone().into_bytes())
        .build()
        .map_err(|err| ProxyError::Reconstruct(err.to_string()))
}

/// Short-lived binding of a payload to one reconstruction.
pub struct Constructor {
    payload: Payload,
}

impl Constructor {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Runs the middleware command over the current payload and swaps in its
    /// output. On failure the held payload is left untouched and the error is
    /// returned for the caller's per-mode policy.
    pub async fn apply_middleware(&mut self, command: &str) -> Result<(), MiddlewareError> {
        self.payload = middleware::apply(command, &self.payload).await?;
        Ok(())
    }

    /// Rebuilds the outgoing request from `payload.request`.
    pub fn reconstruct_request(
        &self,
        client: &reqwest::Client,
    ) -> Result<reqwest::Request, ProxyError> {
        outbound_request(client, &self.payload.request)
    }

    /// Rebuilds the client-bound response from `payload.response`.
    ///
    /// # Errors
    ///
    /// Fails when the recorded status is not a representable HTTP status
    /// code, which can only happen to a payload a middleware mangled.
    pub fn reconstruct_response(&self) -> Result<hyper::Response<Full<Bytes>>, ProxyError> {
        let recorded = &self.payload.response;
        let status = StatusCode::from_u16(recorded.status)
            .map_err(|_| ProxyError::InvalidResponse(format!("status {}", recorded.status)))?;

        let mut response = hyper::Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(recorded.body.clone().into_bytes())))
            .map_err(|err| ProxyError::InvalidResponse(err.to_string()))?;

        let headers = response.headers_mut();
        for (name, values) in &recorded.headers {
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %name, "skipping unrepresentable header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(name.clone(), value);
                    }
                    Err(_) => {
                        tracing::warn!(header = %name, "skipping unrepresentable header value")
                    }
                }
            }
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{Headers, ResponseDetails};

    fn payload() -> Payload {
        Payload {
            response: ResponseDetails {
                status: 200,
                body: "pong".into(),
                headers: Headers::from([
                    ("content-type".to_string(), vec!["text/plain".to_string()]),
                    (
                        "set-cookie".to_string(),
                        vec!["a=1".to_string(), "b=2".to_string()],
                    ),
                    ("connection".to_string(), vec!["close".to_string()]),
                    ("content-length".to_string(), vec!["999".to_string()]),
                ]),
            },
            request: RequestDetails {
                path: "/v1/ping".into(),
                method: "POST".into(),
                destination: "api.test:8080".into(),
                scheme: "http".into(),
                query: "x=1&y=2".into(),
                body: "{\"n\":1}".into(),
                remote_addr: "127.0.0.1:4000".into(),
                headers: Headers::from([
                    ("accept".to_string(), vec!["application/json".to_string()]),
                    ("host".to_string(), vec!["stale.test".to_string()]),
                    ("proxy-connection".to_string(), vec!["keep-alive".to_string()]),
                ]),
            },
            id: "deadbeef".into(),
        }
    }

    #[test]
    fn rebuilds_the_outgoing_request_from_recorded_fields() {
        let client = reqwest::Client::new();
        let request = Constructor::new(payload())
            .reconstruct_request(&client)
            .unwrap();

        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.url().as_str(), "http://api.test:8080/v1/ping?x=1&y=2");
        assert_eq!(request.headers()["accept"], "application/json");
    }

    #[test]
    fn outgoing_request_drops_stale_connection_headers() {
        let client = reqwest::Client::new();
        let request = Constructor::new(payload())
            .reconstruct_request(&client)
            .unwrap();

        assert!(!request.headers().contains_key("host"));
        assert!(!request.headers().contains_key("proxy-connection"));
    }

    #[test]
    fn rebuilds_the_client_response() {
        let response = Constructor::new(payload()).reconstruct_response().unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/plain");
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert!(!response.headers().contains_key("connection"));
        assert!(!response.headers().contains_key("content-length"));
    }

    #[test]
    fn impossible_status_is_rejected() {
        let mut mangled = payload();
        mangled.response.status = 0;
        assert!(matches!(
            Constructor::new(mangled).reconstruct_response(),
            Err(ProxyError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn middleware_swaps_the_payload_in_place() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teapot");
        fs::write(
            &path,
            "#!/bin/sh\ncat > /dev/null\nprintf '%s' '{\"response\":{\"status\":418,\"body\":\"teapot\",\"headers\":{}}}'\n",
        )
        .unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();

        let mut constructor = Constructor::new(payload());
        constructor
            .apply_middleware(path.to_str().unwrap())
            .await
            .unwrap();

        let response = constructor.reconstruct_response().unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
