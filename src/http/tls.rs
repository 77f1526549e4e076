//! TLS material loading for the HTTPS modes.
//!
//! Certificates and keys are re-read on every serving attempt, so a rotated
//! certificate is picked up on the next retry.

use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::ServerError;

fn material_error(kind: &'static str, path: &Path, reason: impl ToString) -> ServerError {
    ServerError::TlsMaterial {
        kind,
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Build the rustls server configuration from a PEM certificate chain and key.
pub fn load_rustls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, ServerError> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| material_error("cert", cert_path, e))?;
    if certs.is_empty() {
        return Err(material_error(
            "cert",
            cert_path,
            "failed to find any PEM data in certificate input",
        ));
    }

    let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| match e {
        pem::Error::NoItemsFound => {
            material_error("key", key_path, "failed to find any PEM data in key input")
        }
        other => material_error("key", key_path, other),
    })?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| material_error("cert", cert_path, e))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| material_error("key", key_path, e))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::debug!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "Loaded TLS certificate"
    );

    Ok(RustlsConfig::from_config(Arc::new(config)))
}
