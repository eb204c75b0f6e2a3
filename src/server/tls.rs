//! TLS context loading and per-connection sessions.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection};

/// Builds the process-wide TLS context from PEM files.
///
/// The certificate file may hold a full chain; the key file must hold one
/// PKCS#8, PKCS#1 or SEC1 private key.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("TLS provider rejected default protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Certificate and private key do not form a valid pair")?;

    Ok(Arc::new(config))
}

/// Starts a server-side session bound to the shared context.
pub fn new_session(config: &Arc<ServerConfig>) -> Result<ServerConnection, rustls::Error> {
    ServerConnection::new(Arc::clone(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open certificate file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {}", path.display()))?;

    if certs.is_empty() {
        bail!("No certificates found in {}", path.display());
    }

    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open private key file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("Failed to parse private key in {}", path.display()))?
        .with_context(|| format!("No private key found in {}", path.display()))
}
