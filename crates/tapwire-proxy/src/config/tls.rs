//! TLS and mTLS configuration.

use serde::{Deserialize, Serialize};

/// TLS configuration for the inbound listener and outbound client auth.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Path to the server certificate chain (PEM).
    #[serde(default)]
    pub cert_path: String,

    /// Path to the server private key (PEM).
    #[serde(default)]
    pub key_path: String,

    /// Port for the TLS listener.
    #[serde(default = "default_tls_port")]
    pub port: u16,

    /// Skip certificate verification for HTTPS upstreams (dev/test only).
    #[serde(default)]
    pub allow_insecure_upstream: bool,

    /// Require and verify client certificates on the TLS listener (mTLS).
    #[serde(default)]
    pub client_auth_required: bool,

    /// CA bundle used to verify client certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_path: Option<String>,

    /// Client certificate presented to upstreams requiring mTLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_path: Option<String>,

    /// Private key for the outbound client certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.enabled {
            return Ok(());
        }
        if self.cert_path.is_empty() {
            anyhow::bail!("tls.cert_path must be provided when TLS is enabled");
        }
        if self.key_path.is_empty() {
            anyhow::bail!("tls.key_path must be provided when TLS is enabled");
        }
        if self.client_auth_required && self.client_ca_path.is_none() {
            anyhow::bail!("tls.client_ca_path must be provided when client_auth_required is set");
        }
        Ok(())
    }

    /// Whether an outbound client certificate is configured.
    pub fn has_client_identity(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }
}

fn default_tls_port() -> u16 {
    8443
}
