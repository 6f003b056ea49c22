//! The proxy core.
//!
//! - `server` - listener set, accept loop, graceful drain
//! - `handler` - per-exchange pipeline (admission, capture, validation,
//!   mode dispatch, async persistence)
//! - `forwarding` - outbound request construction and upstream calls
//! - `recorder` - tee capture of response bodies with a streaming watermark
//! - `replay` - serving stored responses without contacting upstreams
//! - `client` - shared pooled HTTP(S) client with optional outbound mTLS
//! - `tls` - inbound TLS acceptor, optional client-cert verification
//! - `headers` - forwarding-header hygiene and marker headers
//! - `context` - the shared per-process server context

mod client;
mod context;
mod forwarding;
mod handler;
mod headers;
mod recorder;
mod replay;
mod server;
mod tls;

#[cfg(test)]
mod tests;

pub use context::ServerContext;
pub use forwarding::error_response;
pub use recorder::CapturedBody;
pub use server::ProxyServer;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use std::convert::Infallible;

/// Body type used on every response the proxy produces.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Wrap a complete byte payload as a `ProxyBody`.
pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    BoxBody::new(Full::new(bytes.into()).map_err(|never: Infallible| match never {}))
}
