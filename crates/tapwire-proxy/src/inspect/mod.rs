//! Companion query surface for recorded exchanges.
//!
//! A small JSON-only HTTP service on `ui_port`: recent exchange
//! summaries with optional filters, full records by id, health, and
//! Prometheus metrics. No HTML is served here.

use crate::metrics;
use crate::store::{ExchangeRecord, TrafficStore};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

const DEFAULT_LIST_LIMIT: i64 = 100;

pub struct InspectServer {
    addr: SocketAddr,
    store: Arc<TrafficStore>,
}

impl InspectServer {
    pub fn new(port: u16, store: Arc<TrafficStore>) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            store,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("inspection API listening on http://{}", self.addr);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { continue };
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            route_request(req, Arc::clone(&store))
                        });
                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!(error = %e, "inspection connection error");
                        }
                    });
                }
            }
        }
        Ok(())
    }
}

/// Full record as exposed over the API; bodies are rendered as lossy
/// UTF-8 so the payload stays JSON.
#[derive(Serialize)]
struct RecordDetail<'a> {
    #[serde(flatten)]
    record: &'a ExchangeRecord,
    request_body: String,
    response_body: String,
}

async fn route_request<B>(
    req: Request<B>,
    store: Arc<TrafficStore>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    let response = match (req.method(), path.as_str()) {
        (&Method::GET, "/healthz") => json_response(StatusCode::OK, &serde_json::json!({"status": "ok"})),
        (&Method::GET, "/metrics") => text_response(StatusCode::OK, metrics::gather()),
        (&Method::GET, "/api/records") => {
            let params: HashMap<String, String> =
                url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
                    .into_owned()
                    .collect();
            let limit = params
                .get("limit")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_LIST_LIMIT);
            match store
                .recent(limit, params.get("method").map(String::as_str), params.get("url").map(String::as_str))
                .await
            {
                Ok(records) => json_response(StatusCode::OK, &records),
                Err(e) => {
                    debug!(error = %e, "record listing failed");
                    error_json(StatusCode::INTERNAL_SERVER_ERROR, "store query failed")
                }
            }
        }
        (&Method::GET, p) if p.starts_with("/api/records/") => {
            let id = p.trim_start_matches("/api/records/");
            match store.get(id).await {
                Ok(Some(record)) => json_response(
                    StatusCode::OK,
                    &RecordDetail {
                        request_body: String::from_utf8_lossy(&record.request_body).into_owned(),
                        response_body: String::from_utf8_lossy(&record.response_body).into_owned(),
                        record: &record,
                    },
                ),
                Ok(None) => error_json(StatusCode::NOT_FOUND, "record not found"),
                Err(e) => {
                    debug!(error = %e, "record fetch failed");
                    error_json(StatusCode::INTERNAL_SERVER_ERROR, "store query failed")
                }
            }
        }
        _ => error_json(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

fn error_json(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({"error": message}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use http_body_util::BodyExt;

    async fn seeded_store() -> Arc<TrafficStore> {
        let store = TrafficStore::open_in_memory().await.unwrap();
        let record = ExchangeRecord {
            id: "rec-1".to_string(),
            timestamp: Utc::now(),
            protocol: "HTTP".to_string(),
            method: "GET".to_string(),
            url: "/api/x".to_string(),
            service: String::new(),
            request_headers: "{}".to_string(),
            request_body: Vec::new(),
            response_status: 200,
            response_headers: "{}".to_string(),
            response_body: b"ok".to_vec(),
            duration_ms: 5,
            client_ip: "127.0.0.1".to_string(),
            test_id: String::new(),
            session_id: String::new(),
            connection_id: String::new(),
            message_type: String::new(),
            direction: String::new(),
        };
        store.insert(&record).await.unwrap();
        Arc::new(store)
    }

    fn get(path: &str) -> Request<()> {
        Request::builder().method(Method::GET).uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let store = seeded_store().await;
        let response = route_request(get("/healthz"), store).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_records() {
        let store = seeded_store().await;
        let response = route_request(get("/api/records?method=GET"), store).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);
        assert_eq!(parsed[0]["url"], "/api/x");
    }

    #[tokio::test]
    async fn test_get_record_by_id() {
        let store = seeded_store().await;
        let response = route_request(get("/api/records/rec-1"), store).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["id"], "rec-1");
        assert_eq!(parsed["response_body"], "ok");
        assert_eq!(parsed["response_status"], 200);
    }

    #[tokio::test]
    async fn test_unknown_record_is_404() {
        let store = seeded_store().await;
        let response = route_request(get("/api/records/nope"), store).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let store = seeded_store().await;
        let response = route_request(get("/api/other"), store).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let store = seeded_store().await;
        crate::metrics::record_request("GET", 200);
        let response = route_request(get("/metrics"), store).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
