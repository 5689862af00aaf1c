//! Loading of the keystore and truststore PEM bundles.
//!
//! Performs no network I/O. Trust material is loaded once at startup and is
//! immutable for the process lifetime; both transport roles share it
//! read-only.

use std::fs;
use std::path::Path;

use arrowhead_core::SecurityError;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::config::TlsSettings;

/// Private key, certificate chain, and trusted roots of one system.
///
/// The keystore is a PEM bundle whose first certificate is the leaf; the
/// subject common name of that leaf defines this system's identity.
pub struct TrustMaterial {
    key: PrivateKeyDer<'static>,
    chain: Vec<CertificateDer<'static>>,
    roots: Vec<CertificateDer<'static>>,
    common_name: String,
    keystore_pem: Vec<u8>,
}

impl TrustMaterial {
    /// Loads key, certificate chain, and trusted roots from the configured
    /// PEM bundles.
    ///
    /// # Errors
    ///
    /// Returns `SecurityError::Certificate` if the keystore cannot be read
    /// or decoded, holds no plaintext private key or certificate, or the
    /// leaf's subject common name cannot be parsed. Returns
    /// `SecurityError::Trust` if the truststore cannot be read or holds no
    /// certificates.
    pub fn load(settings: &TlsSettings) -> Result<Self, SecurityError> {
        let keystore_pem = fs::read(&settings.keystore_path).map_err(|e| {
            SecurityError::Certificate(format!(
                "cannot read keystore {}: {e}",
                settings.keystore_path.display()
            ))
        })?;

        let (key, chain) = parse_keystore(&keystore_pem, settings.keystore_password.as_deref())?;
        let common_name = leaf_common_name(&chain[0])?;

        let roots = parse_truststore(&settings.truststore_path)?;

        debug!(
            common_name,
            chain_len = chain.len(),
            roots = roots.len(),
            "trust material loaded"
        );

        Ok(Self {
            key,
            chain,
            roots,
            common_name,
            keystore_pem,
        })
    }

    /// Subject common name of the leaf certificate.
    #[must_use]
    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Leaf certificate plus intermediates, leaf first.
    #[must_use]
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Trusted root and intermediate certificates.
    #[must_use]
    pub fn roots(&self) -> &[CertificateDer<'static>] {
        &self.roots
    }

    /// The private key, cloned for handing to a TLS configuration.
    #[must_use]
    pub fn key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }

    /// Raw PEM bytes of the keystore, for transports that consume PEM
    /// directly (the outbound HTTP client identity).
    #[must_use]
    pub fn keystore_pem(&self) -> &[u8] {
        &self.keystore_pem
    }
}

impl std::fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Deliberately omits key material.
        f.debug_struct("TrustMaterial")
            .field("common_name", &self.common_name)
            .field("chain_len", &self.chain.len())
            .field("roots", &self.roots.len())
            .finish_non_exhaustive()
    }
}

/// Splits a keystore PEM bundle into its private key and certificate chain.
fn parse_keystore(
    pem: &[u8],
    password: Option<&str>,
) -> Result<(PrivateKeyDer<'static>, Vec<CertificateDer<'static>>), SecurityError> {
    let mut reader = std::io::Cursor::new(pem);
    let mut key: Option<PrivateKeyDer<'static>> = None;
    let mut chain = Vec::new();

    for item in rustls_pemfile::read_all(&mut reader) {
        let item = item
            .map_err(|e| SecurityError::Certificate(format!("malformed keystore PEM: {e}")))?;
        match item {
            rustls_pemfile::Item::X509Certificate(der) => chain.push(der),
            rustls_pemfile::Item::Pkcs8Key(der) if key.is_none() => {
                key = Some(PrivateKeyDer::Pkcs8(der));
            }
            rustls_pemfile::Item::Pkcs1Key(der) if key.is_none() => {
                key = Some(PrivateKeyDer::Pkcs1(der));
            }
            rustls_pemfile::Item::Sec1Key(der) if key.is_none() => {
                key = Some(PrivateKeyDer::Sec1(der));
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| {
        if password.is_some() {
            SecurityError::Certificate(
                "keystore holds no plaintext private key (encrypted keystores are not supported)"
                    .to_string(),
            )
        } else {
            SecurityError::Certificate("keystore holds no private key".to_string())
        }
    })?;

    if chain.is_empty() {
        return Err(SecurityError::Certificate(
            "keystore holds no certificate".to_string(),
        ));
    }

    Ok((key, chain))
}

/// Extracts the subject common name from the leaf certificate.
fn leaf_common_name(leaf: &CertificateDer<'static>) -> Result<String, SecurityError> {
    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| SecurityError::Certificate(format!("cannot parse leaf certificate: {e}")))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .filter(|cn| !cn.is_empty())
        .ok_or_else(|| {
            SecurityError::Certificate(
                "leaf certificate has no parsable subject common name".to_string(),
            )
        })?;

    Ok(common_name.to_string())
}

/// Reads and parses the truststore PEM bundle.
fn parse_truststore(path: &Path) -> Result<Vec<CertificateDer<'static>>, SecurityError> {
    let pem = fs::read(path)
        .map_err(|e| SecurityError::Trust(format!("cannot read truststore {}: {e}", path.display())))?;

    let mut reader = std::io::Cursor::new(&pem);
    let roots = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SecurityError::Trust(format!("malformed truststore PEM: {e}")))?;

    if roots.is_empty() {
        return Err(SecurityError::Trust(
            "truststore contains no certificates".to_string(),
        ));
    }

    Ok(roots)
}
