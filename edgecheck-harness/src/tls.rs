//! TLS material for backend servers.
//!
//! Backends serve HTTPS by default with a certificate generated at start-up.
//! Deployments whose edge validates backend certificates can supply their own
//! PEM certificate chain and key instead.

use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

use edgecheck_core::HarnessError;
use pki_types::{CertificateDer, PrivateKeyDer};
use rcgen::{CertificateParams, KeyPair, SanType};
use rustls::ServerConfig;

/// DNS name placed in the generated certificate.
pub const SELF_SIGNED_DNS_NAME: &str = "example.com";

/// Loads a TLS `ServerConfig` from a PEM certificate chain and private key.
pub fn load_tls_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<ServerConfig>, HarnessError> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let mut cert_reader = BufReader::new(open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(cert_path, e))?;
    if certs.is_empty() {
        return Err(HarnessError::Tls(format!(
            "{}: no certificates found",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| tls_error(key_path, e))?
        .ok_or_else(|| {
            HarnessError::Tls(format!("{}: no private key found", key_path.display()))
        })?;

    server_config(certs, key)
}

/// Generates a self-signed certificate valid for `example.com`, `127.0.0.1`
/// and `::1`, and wraps it in a `ServerConfig`.
pub fn self_signed_config() -> Result<Arc<ServerConfig>, HarnessError> {
    let (cert, key) = generate_self_signed()?;
    server_config(vec![cert], key)
}

/// The certificate and key behind [`self_signed_config`].
pub fn generate_self_signed(
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>), HarnessError> {
    let mut params = CertificateParams::new(vec![SELF_SIGNED_DNS_NAME.to_string()])
        .map_err(|e| HarnessError::Tls(format!("certificate parameters: {e}")))?;
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)));

    let key_pair =
        KeyPair::generate().map_err(|e| HarnessError::Tls(format!("key generation: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| HarnessError::Tls(format!("self-signing: {e}")))?;

    let key = PrivateKeyDer::try_from(key_pair.serialize_der())
        .map_err(|e| HarnessError::Tls(format!("generated key: {e}")))?;
    Ok((cert.der().clone(), key))
}

/// Server config for HTTP/1.1 over TLS with the given chain and key.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, HarnessError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HarnessError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HarnessError::Tls(e.to_string()))?;

    // Backends only speak HTTP/1.1.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<File, HarnessError> {
    File::open(path).map_err(|e| tls_error(path, e))
}

fn tls_error(path: &Path, e: impl std::fmt::Display) -> HarnessError {
    HarnessError::Tls(format!("{}: {e}", path.display()))
}
