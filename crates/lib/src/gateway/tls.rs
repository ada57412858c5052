//! TLS acceptor from PEM cert + key files.

use crate::config::TlsConfig;
use anyhow::{Context, Result};
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build a TLS acceptor, or `None` when the transport is plain TCP.
pub fn build_tls_acceptor(tls: &TlsConfig) -> Result<Option<TlsAcceptor>> {
    if !tls.is_enabled() {
        return Ok(None);
    }

    let cert_file = std::fs::File::open(&tls.cert)
        .with_context(|| format!("opening TLS cert {}", tls.cert))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing TLS cert {}", tls.cert))?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", tls.cert);
    }

    let key_file = std::fs::File::open(&tls.key)
        .with_context(|| format!("opening TLS key {}", tls.key))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("parsing TLS key {}", tls.key))?
        .with_context(|| format!("no private key found in {}", tls.key))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("TLS config")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}
