//! Configuration types for the traffic inspector proxy.

mod limits;
mod routes;
mod tls;
mod validation;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use limits::{ConnectionPoolConfig, LimitsConfig, RateLimitConfig};
pub use routes::RouteConfig;
pub use tls::TlsConfig;
pub use validation::ApiValidationConfig;

/// Operating mode of the proxy, resolved once at startup.
///
/// Record and replay are mutually exclusive; the per-exchange hot path
/// branches on this enum only, never on configuration flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyMode {
    /// Forward only, nothing persisted.
    Passthrough,
    /// Forward and persist each exchange.
    Record,
    /// Serve prior responses from the store; upstreams are never contacted.
    Replay,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Passthrough => "passthrough",
            ProxyMode::Record => "record",
            ProxyMode::Replay => "replay",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Port for the plain-HTTP listener.
    pub http_port: u16,

    /// Port for the companion inspection API.
    #[serde(default = "default_ui_port")]
    pub ui_port: u16,

    /// Default upstream base URL used when no route prefix matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_upstream: Option<String>,

    /// Ordered path-prefix routes; first match in definition order wins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteConfig>,

    /// Filesystem path of the SQLite exchange store.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Persist every exchange. Mutually exclusive with `replay`.
    #[serde(default)]
    pub recording: bool,

    /// Serve stored responses without contacting upstreams.
    #[serde(default)]
    pub replay: bool,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub api_validation: ApiValidationConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Shut the process down after this many seconds without traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_secs: Option<u64>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration. Errors here abort startup.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.recording && self.replay {
            anyhow::bail!("recording and replay modes cannot be enabled simultaneously");
        }

        if self.http_port == 0 {
            anyhow::bail!("http_port must be configured");
        }

        if self.default_upstream.is_none() && self.routes.is_empty() {
            anyhow::bail!("either default_upstream or at least one route must be set");
        }

        for route in &self.routes {
            route.validate()?;
        }

        self.tls.validate()?;
        self.api_validation.validate()?;

        Ok(())
    }

    /// The mode this process runs in. Immutable after startup; switching
    /// requires a restart.
    pub fn mode(&self) -> ProxyMode {
        if self.recording {
            ProxyMode::Record
        } else if self.replay {
            ProxyMode::Replay
        } else {
            ProxyMode::Passthrough
        }
    }
}

fn default_ui_port() -> u16 {
    9090
}

fn default_store_path() -> String {
    "traffic_inspector.db".to_string()
}
