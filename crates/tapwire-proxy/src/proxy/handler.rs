//! The per-exchange pipeline.
//!
//! Order within one exchange is fixed: admission -> request capture ->
//! request validation -> mode branch (replay | forward) -> response
//! capture -> response validation -> asynchronous persistence. The mode
//! was resolved into an enum at startup; nothing here compares strings.

use super::context::ServerContext;
use super::forwarding::{self, exchange_error_response, InboundMeta};
use super::headers::{MARKER_REQUEST, MARKER_RESPONSE, X_API_VALIDATION_ERROR};
use super::recorder::{self, CapturedBody};
use super::replay;
use super::{full_body, ProxyBody};
use crate::config::ProxyMode;
use crate::error::ExchangeError;
use crate::metrics;
use crate::store::{headers_to_json, ExchangeRecord};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

pub async fn handle_exchange(
    ctx: Arc<ServerContext>,
    peer: SocketAddr,
    via_tls: bool,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    ctx.activity.touch();
    let started = Instant::now();

    // Admission comes before any other work.
    if !ctx.limiter.try_acquire() {
        metrics::record_rate_limited();
        metrics::record_request(req.method().as_str(), 429);
        return Ok(exchange_error_response(&ExchangeError::AdmissionDenied));
    }

    let method = req.method().clone();
    let uri = req.uri().clone();
    let request_url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let peer_ip = peer.ip().to_string();
    let client_ip = client_ip_from(req.headers(), &peer_ip);
    let inbound_host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let max_body = ctx.config.limits.max_request_body_bytes;
    let watermark = ctx.config.limits.response_buffer_watermark;

    debug!(%method, url = %request_url, peer = %client_ip, "received request");

    if content_length(req.headers()).is_some_and(|len| len > max_body as u64) {
        metrics::record_request(method.as_str(), 413);
        return Ok(exchange_error_response(&ExchangeError::RequestTooLarge));
    }

    let (parts, body) = req.into_parts();

    // The body is read into memory only when recording or request
    // validation needs it; otherwise it streams straight through.
    let capture_request = ctx.mode == ProxyMode::Record || ctx.wants_request_validation();
    let (request_body, passthrough_body) = if capture_request {
        match read_body_limited(body, max_body).await {
            Ok(bytes) => (Some(bytes), None),
            Err(err) => {
                warn!(%method, url = %request_url, error = %err, "failed to read inbound body");
                metrics::record_request(method.as_str(), err.status().as_u16());
                return Ok(exchange_error_response(&err));
            }
        }
    } else {
        (None, Some(body))
    };

    let mut request_marker = false;
    if let Some(validator) = ctx.validator.as_ref().filter(|v| v.options().validate_requests) {
        let body_len = request_body.as_ref().map(Bytes::len).unwrap_or(0);
        if body_len > watermark {
            debug!(%method, url = %request_url, "request body exceeds watermark, skipping validation");
        } else if let Err(err) = validator.validate_request(
            &method,
            uri.path(),
            uri.query(),
            &parts.headers,
            request_body.as_deref(),
        ) {
            metrics::record_validation_failure("request");
            warn!(%method, url = %request_url, error = %err, "request failed OpenAPI validation");
            if !validator.options().continue_on_fail {
                metrics::record_request(method.as_str(), 400);
                return Ok(exchange_error_response(
                    &ExchangeError::RequestValidationFailed(err),
                ));
            }
            request_marker = true;
        }
    }

    // Replay never contacts an upstream.
    if ctx.mode == ProxyMode::Replay {
        let mut response = replay::serve_replay(&ctx.store, &method, &request_url).await;
        if request_marker {
            response
                .headers_mut()
                .insert(X_API_VALIDATION_ERROR.clone(), MARKER_REQUEST.clone());
        }
        finish_metrics(&ctx, &method, response.status(), started);
        return Ok(response);
    }

    let Some(upstream) = ctx.router.resolve(uri.path()) else {
        warn!(%method, url = %request_url, "no upstream configured for request path");
        metrics::record_request(method.as_str(), 502);
        return Ok(exchange_error_response(&ExchangeError::UpstreamUnresolved));
    };

    let meta = InboundMeta {
        peer_ip,
        host: inbound_host,
        via_tls,
    };
    let outbound_body: ProxyBody = match (&request_body, passthrough_body) {
        (Some(bytes), _) => full_body(bytes.clone()),
        (None, Some(body)) => BoxBody::new(body),
        (None, None) => full_body(Bytes::new()),
    };

    let outbound =
        match forwarding::build_upstream_request(&method, &uri, &parts.headers, &meta, upstream, outbound_body) {
            Ok(request) => request,
            Err(err) => {
                error!(%method, url = %request_url, upstream = %upstream.origin,
                    "failed to build upstream request");
                metrics::record_request(method.as_str(), err.status().as_u16());
                return Ok(exchange_error_response(&err));
            }
        };

    let mut response = match forwarding::send_upstream(&ctx.client, outbound).await {
        Ok(response) => response.map(BoxBody::new),
        Err(err) => {
            error!(%method, url = %request_url, upstream = %upstream.origin, error = ?err,
                "upstream request failed");
            if ctx.mode == ProxyMode::Record {
                // The 502 is what the client observes; record mode
                // persists it like any other exchange.
                exchange_error_response(&err)
            } else {
                metrics::record_request(method.as_str(), err.status().as_u16());
                return Ok(exchange_error_response(&err));
            }
        }
    };

    if request_marker {
        response
            .headers_mut()
            .insert(X_API_VALIDATION_ERROR.clone(), MARKER_REQUEST.clone());
    }

    let status = response.status();
    let capture_response = ctx.mode == ProxyMode::Record || ctx.wants_response_validation();
    if capture_response {
        let outcome = ExchangeOutcome {
            ctx: Arc::clone(&ctx),
            method: method.clone(),
            path: uri.path().to_string(),
            request_url,
            status,
            response_headers: response.headers().clone(),
            request_headers: parts.headers,
            request_body,
            client_ip,
            service: upstream.host.clone(),
            started,
        };
        let (response, capture_rx) = recorder::capture_response(response, watermark);
        spawn_completion(outcome, capture_rx);
        metrics::record_request(method.as_str(), status.as_u16());
        return Ok(response);
    }

    finish_metrics(&ctx, &method, status, started);
    Ok(response)
}

/// State carried into the post-response task: response validation and,
/// in record mode, persistence. Runs after the client already holds the
/// status line, so nothing here can change the wire response.
struct ExchangeOutcome {
    ctx: Arc<ServerContext>,
    method: Method,
    path: String,
    request_url: String,
    status: StatusCode,
    response_headers: HeaderMap,
    request_headers: HeaderMap,
    request_body: Option<Bytes>,
    client_ip: String,
    service: String,
    started: Instant,
}

fn spawn_completion(outcome: ExchangeOutcome, capture_rx: oneshot::Receiver<CapturedBody>) {
    tokio::spawn(async move {
        let Ok(capture) = capture_rx.await else {
            debug!(method = %outcome.method, url = %outcome.request_url,
                "response capture channel closed, exchange not recorded");
            return;
        };
        let duration = outcome.started.elapsed();

        let mut response_marker = false;
        if let Some(validator) = outcome
            .ctx
            .validator
            .as_ref()
            .filter(|v| v.options().validate_responses)
        {
            match validator.validate_response(
                &outcome.method,
                &outcome.path,
                outcome.status.as_u16(),
                capture.complete_bytes(),
            ) {
                Ok(()) => {
                    debug!(method = %outcome.method, url = %outcome.request_url,
                        "response passed OpenAPI validation");
                }
                Err(err) => {
                    metrics::record_validation_failure("response");
                    warn!(method = %outcome.method, url = %outcome.request_url, error = %err,
                        "response failed OpenAPI validation");
                    response_marker = true;
                }
            }
        }

        if outcome.ctx.mode == ProxyMode::Record {
            let mut response_headers = outcome.response_headers;
            if response_marker {
                response_headers.insert(X_API_VALIDATION_ERROR.clone(), MARKER_RESPONSE.clone());
            }

            let record = ExchangeRecord {
                id: ExchangeRecord::generate_id(),
                timestamp: Utc::now(),
                protocol: "HTTP".to_string(),
                method: outcome.method.to_string(),
                url: outcome.request_url,
                service: outcome.service,
                request_headers: headers_to_json(&outcome.request_headers),
                request_body: outcome
                    .request_body
                    .map(|b| b.to_vec())
                    .unwrap_or_default(),
                response_status: outcome.status.as_u16(),
                response_headers: headers_to_json(&response_headers),
                response_body: capture.stored_bytes(),
                duration_ms: duration.as_millis() as i64,
                client_ip: outcome.client_ip,
                test_id: single_header(&outcome.request_headers, "x-test-id"),
                session_id: single_header(&outcome.request_headers, "x-session-id"),
                connection_id: String::new(),
                message_type: String::new(),
                direction: String::new(),
            };
            outcome.ctx.store.persist_detached(record);
        }

        metrics::observe_duration(
            outcome.method.as_str(),
            outcome.ctx.mode.as_str(),
            duration.as_secs_f64() * 1000.0,
        );
    });
}

fn finish_metrics(ctx: &ServerContext, method: &Method, status: StatusCode, started: Instant) {
    metrics::record_request(method.as_str(), status.as_u16());
    metrics::observe_duration(
        method.as_str(),
        ctx.mode.as_str(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
}

async fn read_body_limited(body: Incoming, limit: usize) -> Result<Bytes, ExchangeError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) => {
            if e.downcast_ref::<http_body_util::LengthLimitError>().is_some() {
                Err(ExchangeError::RequestTooLarge)
            } else {
                Err(ExchangeError::RequestBodyRead(anyhow::anyhow!("{e}")))
            }
        }
    }
}

/// Client IP for the record: first `X-Forwarded-For` element, then
/// `X-Real-IP`, then the socket peer.
fn client_ip_from(headers: &HeaderMap, peer_ip: &str) -> String {
    if let Some(forwarded) = headers
        .get(&super::headers::X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer_ip.to_string()
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn single_header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
