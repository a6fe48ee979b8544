//! Record-and-replay HTTP(S) proxy for service virtualization.
//!
//! Mimic sits between a client under test and a real HTTP service. Depending
//! on the configured mode it forwards and records live traffic, answers from
//! its recordings without an upstream, manufactures responses from an
//! external program, or transforms live traffic through one. Every request is
//! reduced to a deterministic fingerprint so identical requests can be served
//! from the local store.
//!
//! # Architecture
//! - [`proxy`] accepts connections and classifies them: proxied plain HTTP,
//!   CONNECT tunnels (intercepted or relayed), or direct traffic.
//! - [`engine`] runs each request through the configured [`config::Mode`].
//! - [`fingerprint`] derives the stable content hash a request is stored
//!   under, and [`codec`] (de)serializes [`payload::Payload`] records for the
//!   [`cache`].
//! - [`middleware`] pipes payloads through an external executable as JSON;
//!   [`constructor`] rebuilds real HTTP messages from payloads.
//! - [`tls`] forges per-host certificates so intercepted tunnels can be
//!   decrypted; [`admin`] serves the small operational surface.

/// Persistent recording store over an embedded KV tree.
pub mod cache;

/// Binary codec for stored payloads.
pub mod codec;

/// Command line parsing and validated runtime configuration.
pub mod config;

/// Rebuilds outgoing requests and client-bound responses from payloads.
pub mod constructor;

/// Per-request mode dispatch: capture, virtualize, synthesize, modify.
pub mod engine;

/// Failure taxonomy for request processing.
pub mod error;

/// Deterministic request identity hashing.
pub mod fingerprint;

/// Out-of-process payload transforms over JSON stdio.
pub mod middleware;

/// Request, response and payload domain model.
pub mod payload;

/// Listening frontend: proxied requests, tunnels and direct traffic.
pub mod proxy;

/// Certificate authority for intercepted tunnels.
pub mod tls;

/// Structured logging setup.
pub mod tracing;

/// Admin surface: health, record count, wipe.
pub mod admin;

pub use cache::Cache;
pub use config::{Config, Mode};
pub use engine::Engine;
pub use payload::{Payload, RequestDetails, ResponseDetails};
pub use tls::MitmAuthority;
