//! Shared upstream HTTP client.
//!
//! One pooled client serves every exchange. HTTPS upstreams are verified
//! against the platform trust store unless `allow_insecure_upstream` is
//! set; when an outbound client certificate is configured it is presented
//! to upstreams requiring mTLS.

use super::tls::{load_certs, load_private_key, NoVerifier};
use super::ProxyBody;
use crate::config::Config;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, ProxyBody>;

pub fn create_http_client(config: &Config) -> Result<HttpClient, anyhow::Error> {
    let pool = &config.connection_pool;

    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false);

    let tls_config = upstream_tls_config(config)?;
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_all_versions()
        .wrap_connector(http_connector);

    let client = Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        max_idle_per_host = pool.max_idle_per_host,
        idle_timeout_secs = pool.idle_timeout_secs,
        keepalive_secs = pool.keepalive_timeout_secs,
        connect_timeout_secs = pool.connect_timeout_secs,
        "upstream connection pool configured"
    );

    Ok(client)
}

fn upstream_tls_config(config: &Config) -> Result<rustls::ClientConfig, anyhow::Error> {
    let builder = if config.tls.allow_insecure_upstream {
        warn!("upstream TLS certificate verification DISABLED (development/testing only)");
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
    } else {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs()
            .map_err(|e| anyhow::anyhow!("loading native root certificates: {e}"))?;
        for cert in native {
            // Individual unparseable platform certs are skipped.
            let _ = roots.add(cert);
        }
        rustls::ClientConfig::builder().with_root_certificates(roots)
    };

    let tls_config = if config.tls.has_client_identity() {
        let cert_path = config.tls.client_cert_path.as_deref().unwrap_or_default();
        let key_path = config.tls.client_key_path.as_deref().unwrap_or_default();
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        info!("outbound mTLS enabled: presenting client certificate to upstreams");
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("loading outbound client certificate: {e}"))?
    } else {
        builder.with_no_client_auth()
    };

    Ok(tls_config)
}
