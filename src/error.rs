//! Failure taxonomy for per-request processing.

use crate::cache::CacheError;
use crate::codec::DecodeError;
use crate::middleware::MiddlewareError;

/// Everything that can abort the handling of a single request.
///
/// Not every failure in the system is one of these: a cache miss is an
/// ordinary `Ok(None)` read, a failed recording write is logged and swallowed,
/// and configuration problems are rejected before the first request is ever
/// accepted. What remains here is surfaced to the client as a proxy-level
/// failure response.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),
    #[error("could not read response body: {0}")]
    BodyRead(String),
    #[error(transparent)]
    Store(#[from] CacheError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Middleware(#[from] MiddlewareError),
    #[error("could not rebuild upstream request: {0}")]
    Reconstruct(String),
    #[error("could not rebuild client response: {0}")]
    InvalidResponse(String),
}
