//! LDAPS support for Dirgate
//!
//! Wraps accepted TCP streams in TLS before they reach the LDAP session loop.
//! Certificates and keys are PEM files; TLS 1.2 and 1.3 are supported.

use dirgate_core::config::{TlsConfig, TlsVersion};
use dirgate_core::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{
    self,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use tokio_rustls::server::TlsStream;
use tracing::info;

/// TLS Acceptor wrapper for async TLS connections
#[derive(Clone)]
pub struct TlsAcceptor {
    acceptor: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Create a new TLS acceptor from configuration
    pub fn from_config(config: &TlsConfig) -> Result<Self> {
        config.validate()?;

        let cert_file = config
            .cert_file
            .as_ref()
            .ok_or_else(|| Error::Tls("Certificate file not specified".into()))?;
        let key_file = config
            .key_file
            .as_ref()
            .ok_or_else(|| Error::Tls("Key file not specified".into()))?;

        let certs = load_certs(cert_file)?;
        info!("Loaded {} certificate(s)", certs.len());

        let key = load_private_key(key_file)?;

        let versions: Vec<&'static rustls::SupportedProtocolVersion> = match config.min_version {
            TlsVersion::Tls12 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls13 => vec![&rustls::version::TLS13],
        };

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let server_config = rustls::ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| Error::Tls(format!("Unsupported protocol versions: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(format!("TLS config error: {}", e)))?;

        info!("Minimum TLS version: {:?}", config.min_version);

        Ok(Self {
            acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Run the server side of the handshake
    pub async fn accept(&self, stream: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        self.acceptor.accept(stream).await
    }
}

/// Load certificates from PEM file
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open certificate file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates found in {:?}", path)));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Ok(PrivateKeyDer::Sec1(key)),
            Ok(None) => break,
            // Certificates may share the file with the key
            Ok(Some(_)) => continue,
            Err(e) => return Err(Error::Tls(format!("Failed to parse private key: {}", e))),
        }
    }

    Err(Error::Tls(format!("No private key found in {:?}", path)))
}
