//! Admission, buffering, and connection-pool tuning.

use serde::{Deserialize, Serialize};

/// Token-bucket admission control at the inbound edge.
///
/// A `requests_per_second` of zero disables admission control entirely.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub requests_per_second: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 0.0,
            burst: default_burst(),
        }
    }
}

fn default_burst() -> u32 {
    1
}

/// Body-size limits for the inbound edge and the response recorder.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Inbound bodies above this are rejected with 413 before any
    /// forwarding or capture.
    #[serde(default = "default_max_request_body")]
    pub max_request_body_bytes: usize,

    /// Response bytes buffered before the recorder switches to streaming
    /// mode and stores a size sentinel instead of the payload.
    #[serde(default = "default_watermark")]
    pub response_buffer_watermark: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_body_bytes: default_max_request_body(),
            response_buffer_watermark: default_watermark(),
        }
    }
}

fn default_max_request_body() -> usize {
    32 * 1024 * 1024
}

fn default_watermark() -> usize {
    1024 * 1024
}

/// Upstream connection pool tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_timeout_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    90
}

fn default_connect_timeout() -> u64 {
    10
}
