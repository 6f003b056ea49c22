//! TLS termination for inbound traffic.
//!
//! Builds the server-side acceptor from the configured cert/key and,
//! when mTLS is required, a WebPKI client-certificate verifier over the
//! configured CA bundle so unverified peers fail at the handshake.
//! Also home of the `NoVerifier` used when upstream verification is
//! explicitly disabled.

use crate::config::TlsConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Load a PEM certificate chain.
pub(crate) fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, anyhow::Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open certificate file '{path}': {e}"))?;
    let mut reader = std::io::BufReader::new(file);
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("failed to parse certificate file '{path}': {e}"))?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in '{path}'");
    }
    Ok(certs)
}

/// Load a PEM private key (PKCS#8, RSA, or EC).
pub(crate) fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, anyhow::Error> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("failed to open private key file '{path}': {e}"))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| anyhow::anyhow!("failed to parse private key file '{path}': {e}"))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in '{path}'"))
}

/// Create the inbound TLS acceptor. Missing or unusable material is a
/// startup error.
pub fn create_tls_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor, anyhow::Error> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;

    let config = if tls.client_auth_required {
        let ca_path = tls
            .client_ca_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("client_ca_path is required for mTLS"))?;
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|e| anyhow::anyhow!("invalid client CA certificate in '{ca_path}': {e}"))?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| anyhow::anyhow!("building client certificate verifier: {e}"))?;
        rustls::ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("building TLS configuration: {e}"))?
    } else {
        rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| anyhow::anyhow!("building TLS configuration: {e}"))?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Certificate verifier that accepts anything. Installed on the upstream
/// client only when `allow_insecure_upstream` is set.
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}
