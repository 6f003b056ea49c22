//! Forwarding-header hygiene and marker headers.
//!
//! Static header names avoid runtime `.parse().unwrap()` calls on the
//! hot path. `forward_headers` builds the complete outbound header map:
//! hop-by-hop headers stripped, `X-Forwarded-*` augmented, `Host` set to
//! the upstream.

use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashSet;

/// Marker set on responses (and stored records) when validation failed
/// but the exchange was allowed to continue.
pub static X_API_VALIDATION_ERROR: HeaderName =
    HeaderName::from_static("x-api-validation-error");
pub static MARKER_REQUEST: HeaderValue = HeaderValue::from_static("request");
pub static MARKER_RESPONSE: HeaderValue = HeaderValue::from_static("response");

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

static PROTO_HTTP: HeaderValue = HeaderValue::from_static("http");
static PROTO_HTTPS: HeaderValue = HeaderValue::from_static("https");

/// RFC 9110 hop-by-hop headers, never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Build the outbound header map for a forwarded request.
///
/// Copies end-to-end headers, drops hop-by-hop headers and any header
/// named in `Connection`, appends the peer IP to `X-Forwarded-For`, sets
/// `X-Forwarded-Host`/`X-Forwarded-Proto` from the inbound side, and
/// rewrites `Host` to the upstream. `Content-Length` is dropped so the
/// client re-derives it from the actual outbound body.
pub fn forward_headers(
    inbound: &HeaderMap,
    peer_ip: &str,
    inbound_host: Option<&str>,
    via_tls: bool,
    upstream_host: &str,
) -> HeaderMap {
    let connection_named: HashSet<String> = inbound
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .collect();

    let mut out = HeaderMap::with_capacity(inbound.len() + 4);
    for (name, value) in inbound.iter() {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || *name == X_FORWARDED_FOR
            || *name == X_FORWARDED_HOST
            || *name == X_FORWARDED_PROTO
            || connection_named.contains(name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    let prior: Vec<&str> = inbound
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let forwarded_for = if prior.is_empty() {
        peer_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), peer_ip)
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        out.insert(X_FORWARDED_FOR.clone(), value);
    }

    if let Some(host) = inbound_host {
        if let Ok(value) = HeaderValue::from_str(host) {
            out.insert(X_FORWARDED_HOST.clone(), value);
        }
    }

    out.insert(
        X_FORWARDED_PROTO.clone(),
        if via_tls {
            PROTO_HTTPS.clone()
        } else {
            PROTO_HTTP.clone()
        },
    );

    if let Ok(value) = HeaderValue::from_str(upstream_host) {
        out.insert(header::HOST, value);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("public.example.com"));
        headers.insert("accept", HeaderValue::from_static("application/json"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers
    }

    #[test]
    fn test_forwarded_proto_and_host() {
        let out = forward_headers(
            &inbound(),
            "10.0.0.9",
            Some("public.example.com"),
            true,
            "backend:8001",
        );
        assert_eq!(out.get(&X_FORWARDED_PROTO).unwrap(), "https");
        assert_eq!(out.get(&X_FORWARDED_HOST).unwrap(), "public.example.com");
        assert_eq!(out.get(header::HOST).unwrap(), "backend:8001");

        let out = forward_headers(&inbound(), "10.0.0.9", None, false, "backend:8001");
        assert_eq!(out.get(&X_FORWARDED_PROTO).unwrap(), "http");
        assert!(out.get(&X_FORWARDED_HOST).is_none());
    }

    #[test]
    fn test_forwarded_for_appends_peer() {
        let mut headers = inbound();
        headers.insert(
            X_FORWARDED_FOR.clone(),
            HeaderValue::from_static("203.0.113.7"),
        );
        let out = forward_headers(&headers, "10.0.0.9", None, false, "b:1");
        assert_eq!(out.get(&X_FORWARDED_FOR).unwrap(), "203.0.113.7, 10.0.0.9");

        // The peer IP is always the last comma-separated element.
        let value = out.get(&X_FORWARDED_FOR).unwrap().to_str().unwrap();
        assert_eq!(value.rsplit(',').next().unwrap().trim(), "10.0.0.9");
    }

    #[test]
    fn test_forwarded_for_without_prior_value() {
        let out = forward_headers(&inbound(), "10.0.0.9", None, false, "b:1");
        assert_eq!(out.get(&X_FORWARDED_FOR).unwrap(), "10.0.0.9");
    }

    #[test]
    fn test_hop_by_hop_stripped() {
        let mut headers = inbound();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-droppable"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-droppable", HeaderValue::from_static("1"));
        headers.insert("x-keepable", HeaderValue::from_static("1"));

        let out = forward_headers(&headers, "10.0.0.9", None, false, "b:1");
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("x-droppable").is_none());
        assert_eq!(out.get("x-keepable").unwrap(), "1");
    }

    #[test]
    fn test_content_length_dropped() {
        let out = forward_headers(&inbound(), "10.0.0.9", None, false, "b:1");
        assert!(out.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn test_end_to_end_headers_copied() {
        let out = forward_headers(&inbound(), "10.0.0.9", None, false, "b:1");
        assert_eq!(out.get("accept").unwrap(), "application/json");
    }
}
