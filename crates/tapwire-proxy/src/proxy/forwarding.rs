//! Outbound request construction and upstream calls.
//!
//! The outbound request keeps the inbound method, end-to-end headers,
//! and body; scheme, host, and port come from the resolved upstream
//! while the original path and raw query are preserved byte-for-byte.

use super::client::HttpClient;
use super::headers::forward_headers;
use super::{full_body, ProxyBody};
use crate::error::ExchangeError;
use crate::router::UpstreamOrigin;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use tracing::debug;

/// Map an exchange error to its client-facing response.
pub fn exchange_error_response(err: &ExchangeError) -> Response<ProxyBody> {
    error_response(err.status(), &err.to_string())
}

/// Short plaintext error response, the shape of every client-facing failure.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(format!("{message}\n")));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Inbound connection facts needed to build forwarding headers.
#[derive(Debug, Clone)]
pub struct InboundMeta {
    pub peer_ip: String,
    pub host: Option<String>,
    pub via_tls: bool,
}

/// Build the outbound request for the resolved upstream.
pub fn build_upstream_request(
    method: &Method,
    uri: &Uri,
    inbound_headers: &HeaderMap,
    meta: &InboundMeta,
    upstream: &UpstreamOrigin,
    body: ProxyBody,
) -> Result<Request<ProxyBody>, ExchangeError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let target: Uri = format!("{}{}", upstream.origin, path_and_query)
        .parse()
        .map_err(|_| ExchangeError::UpstreamInvalid)?;

    debug!(%method, %target, "forwarding to upstream");

    let mut request = Request::builder()
        .method(method.clone())
        .uri(target)
        .body(body)
        .map_err(|_| ExchangeError::UpstreamInvalid)?;

    *request.headers_mut() = forward_headers(
        inbound_headers,
        &meta.peer_ip,
        meta.host.as_deref(),
        meta.via_tls,
        &upstream.host,
    );

    Ok(request)
}

/// Perform the upstream call. Any transport failure maps to 502; no
/// retry is attempted.
pub async fn send_upstream(
    client: &HttpClient,
    request: Request<ProxyBody>,
) -> Result<Response<Incoming>, ExchangeError> {
    client
        .request(request)
        .await
        .map_err(|e| ExchangeError::UpstreamTransport(anyhow::anyhow!("{e}")))
}
