//! Per-request mode dispatch.
//!
//! The engine owns the shared pieces every request needs: the immutable
//! configuration, the recording store and the pooled upstream client. Each
//! inbound request is buffered, flattened to a [`RequestDetails`] and run
//! through the configured [`Mode`]:
//!
//! - **Capture** forwards upstream and persists the exchange under its
//!   fingerprint.
//! - **Virtualize** answers from the store and never opens an upstream
//!   connection; unknown requests get a `412` telling the caller nothing was
//!   ever recorded.
//! - **Synthesize** manufactures the response entirely from the middleware
//!   command, with no upstream and no store write.
//! - **Modify** forwards upstream and routes the live exchange through the
//!   middleware before answering.
//!
//! Errors inside a mode become a `502` with a plain-text explanation; the
//! connection itself stays healthy. Every response leaving the engine carries
//! the transit marker header.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full};

use crate::cache::Cache;
use crate::codec;
use crate::config::{Config, Mode};
use crate::constructor::{outbound_request, Constructor};
use crate::error::ProxyError;
use crate::fingerprint::fingerprint;
use crate::middleware::MiddlewareError;
use crate::payload::{headers_from_map, Payload, RequestDetails, ResponseDetails};

/// Marker header stamped on every response that transited the proxy.
pub const TRANSIT_HEADER: &str = "x-mimic-proxy";
pub const TRANSIT_VALUE: &str = "transited";

/// Fully buffered response on its way back to the client.
pub type EngineResponse = hyper::Response<Full<Bytes>>;

/// Shared per-process request processor.
pub struct Engine {
    config: Arc<Config>,
    cache: Cache,
    client: reqwest::Client,
}

impl Engine {
    /// Builds the engine and its pooled upstream client.
    ///
    /// The client never follows redirects (they are part of the recorded
    /// exchange) and ignores any ambient proxy environment, since the process
    /// itself is the proxy.
    pub fn new(config: Arc<Config>, cache: Cache) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;
        Ok(Self {
            config,
            cache,
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Runs one inbound request through the configured mode and returns the
    /// response to send back.
    ///
    /// The body is buffered up front so it can be fingerprinted, forwarded
    /// and persisted from the same copy. A request-side read failure is
    /// logged and treated as an empty body; the request still proceeds.
    pub async fn process<B>(
        &self,
        request: hyper::Request<B>,
        scheme: &str,
        destination: &str,
        remote_addr: &str,
    ) -> EngineResponse
    where
        B: hyper::body::Body,
        B::Error: std::error::Error,
    {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                tracing::warn!(error = %err, "could not read request body, proceeding with an empty one");
                Bytes::new()
            }
        };

        let details = RequestDetails::from_parts(&parts, &body, scheme, destination, remote_addr);
        tracing::debug!(
            mode = %self.config.mode,
            method = %details.method,
            destination = %details.destination,
            path = %details.path,
            "processing request"
        );

        let result = match self.config.mode {
            Mode::Capture => self.capture(details).await,
            Mode::Virtualize => self.virtualize(details).await,
            Mode::Synthesize => self.synthesize(details).await,
            Mode::Modify => self.modify(details).await,
        };

        let mut response = result.unwrap_or_else(|err| {
            tracing::error!(error = %err, "request failed");
            failure_response(&err)
        });
        response.headers_mut().insert(
            HeaderName::from_static(TRANSIT_HEADER),
            HeaderValue::from_static(TRANSIT_VALUE),
        );
        response
    }

    /// Forward upstream, persist the exchange, answer with the live response.
    ///
    /// A failed store write is logged and swallowed: the client already has a
    /// perfectly good answer in flight.
    async fn capture(&self, details: RequestDetails) -> Result<EngineResponse, ProxyError> {
        let response = self.forward(&details).await?;
        let payload = Payload {
            id: fingerprint(&details),
            request: details,
            response,
        };

        let encoded = codec::encode(&payload);
        if let Err(err) = self.cache.set(payload.id.as_bytes(), &encoded).await {
            tracing::warn!(error = %err, id = %payload.id, "could not persist recording");
        } else {
            tracing::debug!(id = %payload.id, "recorded exchange");
        }

        Constructor::new(payload).reconstruct_response()
    }

    /// Answer from the store; never open an upstream connection.
    async fn virtualize(&self, details: RequestDetails) -> Result<EngineResponse, ProxyError> {
        let id = fingerprint(&details);

        let recorded = match self.cache.get(id.as_bytes()) {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(error = %err, id = %id, "store read failed, serving a miss");
                None
            }
        };
        let Some(recorded) = recorded else {
            tracing::debug!(id = %id, "no recording");
            return Ok(never_recorded(&details));
        };

        let payload = match codec::decode(&recorded) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, id = %id, "recording undecodable, serving a miss");
                return Ok(never_recorded(&details));
            }
        };

        let mut constructor = Constructor::new(payload);
        if let Some(command) = &self.config.middleware {
            // A broken transform must not break replay; the recorded response
            // is served untransformed.
            if let Err(err) = constructor.apply_middleware(command).await {
                tracing::warn!(error = %err, id = %id, "middleware failed, serving the recording as-is");
            }
        }
        constructor.reconstruct_response()
    }

    /// Manufacture the response entirely from the middleware command.
    async fn synthesize(&self, details: RequestDetails) -> Result<EngineResponse, ProxyError> {
        let command = self
            .config
            .middleware
            .as_deref()
            .ok_or(MiddlewareError::NotConfigured)?;

        let payload = Payload {
            id: fingerprint(&details),
            request: details,
            response: ResponseDetails::default(),
        };

        let mut constructor = Constructor::new(payload);
        constructor.apply_middleware(command).await?;
        constructor.reconstruct_response()
    }

    /// Forward upstream and transform the live exchange before answering.
    /// Nothing is persisted.
    async fn modify(&self, details: RequestDetails) -> Result<EngineResponse, ProxyError> {
        let command = self
            .config
            .middleware
            .as_deref()
            .ok_or(MiddlewareError::NotConfigured)?;

        let response = self.forward(&details).await?;
        let payload = Payload {
            id: fingerprint(&details),
            request: details,
            response,
        };

        let mut constructor = Constructor::new(payload);
        constructor.apply_middleware(command).await?;
        constructor.reconstruct_response()
    }

    /// One upstream round trip, fully buffered.
    async fn forward(&self, details: &RequestDetails) -> Result<ResponseDetails, ProxyError> {
        let request = outbound_request(&self.client, details)?;
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|err| ProxyError::UpstreamUnreachable(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = headers_from_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| ProxyError::BodyRead(err.to_string()))?;

        Ok(ResponseDetails {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
            headers,
        })
    }
}

/// The synthetic miss answer for a request that was never captured.
fn never_recorded(details: &RequestDetails) -> EngineResponse {
    let text = format!(
        "request was never recorded: {} {}{}",
        details.method, details.destination, details.path
    );
    plain_text(StatusCode::PRECONDITION_FAILED, text)
}

fn failure_response(err: &ProxyError) -> EngineResponse {
    plain_text(StatusCode::BAD_GATEWAY, format!("proxy failure: {err}"))
}

fn plain_text(status: StatusCode, body: String) -> EngineResponse {
    let mut response = hyper::Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
