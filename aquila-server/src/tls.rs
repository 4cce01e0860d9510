//! TLS support for the TCP listener.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;

/// Certificate and key paths for the TCP listener.
///
/// Either file failing to load disables the TCP listener entirely; there is
/// no plaintext fallback.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the certificate chain (PEM).
    pub cert_path: String,
    /// Path to the private key (PEM).
    pub key_path: String,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Build a TLS acceptor from this configuration.
    pub fn build_acceptor(&self) -> Result<TlsAcceptor, ServerError> {
        let certs = load_certs(&self.cert_path)?;
        let key = load_private_key(&self.key_path)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| ServerError::Tls(format!("failed to configure TLS: {}", e)))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Load certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let file = File::open(Path::new(path))
        .map_err(|e| ServerError::Tls(format!("failed to open cert file `{}`: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Tls(format!("failed to parse certs from `{}`: {}", path, e)))?;

    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in `{}`",
            path
        )));
    }

    Ok(certs)
}

/// Load a private key from a PEM file, accepting the common key formats.
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, ServerError> {
    let file = File::open(Path::new(path))
        .map_err(|e| ServerError::Tls(format!("failed to open key file `{}`: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(ServerError::Tls(format!(
                    "failed to parse key from `{}`: {}",
                    path, e
                )));
            }
        }
    }

    Err(ServerError::Tls(format!("no private key found in `{}`", path)))
}
