//! Certificate and key loading for the optional TLS transport.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::crypto::aws_lc_rs;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::info;

use crate::{AppError, Result};

/// Build a server-side acceptor from a PEM certificate chain and key.
///
/// # Errors
///
/// Returns `AppError::Tls` if either file is unreadable, holds no usable
/// material, or the key does not match the certificate.
pub fn load_acceptor(cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|err| AppError::Tls(format!("unsupported protocol versions: {err}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| AppError::Tls(format!("invalid certificate or key: {err}")))?;

    info!(cert = %cert_file.display(), "transport security enabled");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Build a client-side connector trusting the CA certificates in `ca_file`.
///
/// # Errors
///
/// Returns `AppError::Tls` if the CA file is unreadable or holds no
/// certificates.
pub fn load_connector(ca_file: &Path) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        roots
            .add(cert)
            .map_err(|err| AppError::Tls(format!("invalid CA certificate: {err}")))?;
    }

    let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|err| AppError::Tls(format!("unsupported protocol versions: {err}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Parse a DNS name or IP address for server certificate verification.
///
/// # Errors
///
/// Returns `AppError::Tls` if `name` is neither.
pub fn server_name(name: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(name)
        .map(|parsed| parsed.to_owned())
        .map_err(|err| AppError::Tls(format!("invalid server name '{name}': {err}")))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| AppError::Tls(format!("bad certificate in {}: {err}", path.display())))?;

    if certs.is_empty() {
        return Err(AppError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| AppError::Tls(format!("bad private key in {}: {err}", path.display())))?
        .ok_or_else(|| AppError::Tls(format!("no private key found in {}", path.display())))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| AppError::Tls(format!("cannot open {}: {err}", path.display())))
}
