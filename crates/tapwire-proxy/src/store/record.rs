//! The persisted exchange record and header serialization helpers.

use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;

/// One recorded exchange: request and response bytes, headers, timing,
/// and peer metadata. `connection_id`, `message_type`, `direction`, and
/// `test_id`/`session_id` beyond their header sources are reserved for
/// non-HTTP protocols and stay empty for HTTP exchanges.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub protocol: String,
    pub method: String,
    pub url: String,
    pub service: String,
    pub request_headers: String,
    #[serde(skip)]
    pub request_body: Vec<u8>,
    pub response_status: u16,
    pub response_headers: String,
    #[serde(skip)]
    pub response_body: Vec<u8>,
    pub duration_ms: i64,
    pub client_ip: String,
    pub test_id: String,
    pub session_id: String,
    pub connection_id: String,
    pub message_type: String,
    pub direction: String,
}

impl ExchangeRecord {
    /// Unique id, stable for the process lifetime and unique across all
    /// stored records.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Whether the captured status is a legal HTTP status code.
    pub fn status_valid(&self) -> bool {
        (100..=599).contains(&self.response_status)
    }
}

/// Serialize a header map as JSON `{name: [values...]}`, preserving the
/// order of repeated values per name.
pub fn headers_to_json(headers: &HeaderMap) -> String {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        map.insert(name.as_str().to_string(), values);
    }
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

/// Parse a stored header JSON document back into name/values pairs.
/// Tolerates junk by returning an empty set.
pub fn headers_from_json(raw: &str) -> Vec<(String, Vec<String>)> {
    serde_json::from_str::<BTreeMap<String, Vec<String>>>(raw)
        .map(|map| map.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderName, HeaderValue};

    #[test]
    fn test_headers_round_trip_preserves_multi_values() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("a=1"),
        );
        headers.append(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("b=2"),
        );

        let json = headers_to_json(&headers);
        let parsed = headers_from_json(&json);

        let cookies = parsed
            .iter()
            .find(|(name, _)| name == "set-cookie")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(cookies, vec!["a=1".to_string(), "b=2".to_string()]);
    }

    #[test]
    fn test_headers_from_garbage_is_empty() {
        assert!(headers_from_json("not json").is_empty());
        assert!(headers_from_json("").is_empty());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = ExchangeRecord::generate_id();
        let b = ExchangeRecord::generate_id();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_status_validity() {
        let mut record = sample();
        assert!(record.status_valid());
        record.response_status = 99;
        assert!(!record.status_valid());
        record.response_status = 600;
        assert!(!record.status_valid());
    }

    fn sample() -> ExchangeRecord {
        ExchangeRecord {
            id: ExchangeRecord::generate_id(),
            timestamp: Utc::now(),
            protocol: "HTTP".to_string(),
            method: "GET".to_string(),
            url: "/x".to_string(),
            service: String::new(),
            request_headers: "{}".to_string(),
            request_body: Vec::new(),
            response_status: 200,
            response_headers: "{}".to_string(),
            response_body: b"hello".to_vec(),
            duration_ms: 1,
            client_ip: "127.0.0.1".to_string(),
            test_id: String::new(),
            session_id: String::new(),
            connection_id: String::new(),
            message_type: String::new(),
            direction: String::new(),
        }
    }
}
