//! Serving stored responses in replay mode.
//!
//! No upstream is ever contacted here: a hit reconstructs the stored
//! status, headers, and body; a miss is a 404 and a store failure a 500.

use super::forwarding::{error_response, exchange_error_response};
use super::{full_body, ProxyBody};
use crate::error::ExchangeError;
use crate::metrics;
use crate::store::{headers_from_json, TrafficStore};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Method, Response, StatusCode};
use tracing::{error, info, warn};

pub async fn serve_replay(store: &TrafficStore, method: &Method, url: &str) -> Response<ProxyBody> {
    match store.find_replay(method.as_str(), url).await {
        Ok(Some(stored)) => {
            let Ok(status) = StatusCode::from_u16(stored.status) else {
                warn!(%method, url, status = stored.status, "stored record has invalid status");
                metrics::record_replay("error");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Stored replay record is corrupt",
                );
            };

            let mut response = Response::new(full_body(stored.body));
            *response.status_mut() = status;
            for (name, values) in headers_from_json(&stored.headers_json) {
                let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                    continue;
                };
                for value in values {
                    if let Ok(value) = HeaderValue::from_str(&value) {
                        response.headers_mut().append(name.clone(), value);
                    }
                }
            }

            metrics::record_replay("hit");
            info!(%method, url, status = status.as_u16(), "replayed stored response");
            response
        }
        Ok(None) => {
            metrics::record_replay("miss");
            info!(%method, url, "no replay record found");
            exchange_error_response(&ExchangeError::ReplayMiss)
        }
        Err(e) => {
            metrics::record_replay("error");
            error!(%method, url, error = %e, "store lookup failed during replay");
            exchange_error_response(&ExchangeError::StoreReadFailed(e))
        }
    }
}
