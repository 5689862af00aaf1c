//! Mutual-TLS context: one loaded identity usable in both transport roles.
//!
//! The outbound role hands the keystore PEM and trust anchors to the HTTP
//! client; the inbound role is a rustls `ServerConfig` that requires and
//! verifies client certificates against the same trust set. Both are built
//! once at construction and shared read-only.

use std::sync::Arc;

use arrowhead_core::{Identity, SecurityError};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tracing::debug;

use crate::config::SystemSettings;

use super::trust::TrustMaterial;

/// TLS pieces consumed by the outbound HTTP client.
///
/// Cheap to clone: both fields are internally reference-counted.
#[derive(Clone)]
pub struct ClientTls {
    /// This system's key + certificate chain, presented to remote peers.
    pub identity: reqwest::Identity,
    /// Trust anchors the remote peer's certificate is verified against.
    pub roots: Vec<reqwest::Certificate>,
}

/// A system's cryptographic identity bound to ready-made TLS configurations.
pub struct TrustContext {
    identity: Identity,
    material: TrustMaterial,
    client_tls: ClientTls,
    server_config: Arc<rustls::ServerConfig>,
}

impl TrustContext {
    /// Builds the context from loaded trust material and system settings.
    ///
    /// The system name defaults to the first label of the leaf certificate's
    /// common name unless the settings carry an explicit name.
    ///
    /// # Errors
    ///
    /// Returns `SecurityError::Trust` if the trust anchors cannot form a
    /// root store or client verifier, and `SecurityError::Certificate` if
    /// the key and chain are rejected by the TLS stack.
    pub fn new(material: TrustMaterial, system: &SystemSettings) -> Result<Self, SecurityError> {
        // Several TLS backends may be linked; pin the process-wide provider
        // before the first config is built. Already-installed is fine.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let system_name = system
            .name
            .clone()
            .unwrap_or_else(|| first_label(material.common_name()).to_string());
        let identity = Identity::new(system_name, system.address.clone(), system.port);

        let client_tls = build_client_tls(&material)?;
        let server_config = build_server_config(&material)?;

        debug!(%identity, "trust context established");

        Ok(Self {
            identity,
            material,
            client_tls,
            server_config,
        })
    }

    /// Loads trust material from disk and builds the context in one step.
    ///
    /// # Errors
    ///
    /// Propagates every failure mode of [`TrustMaterial::load`] and
    /// [`TrustContext::new`].
    pub fn from_settings(
        tls: &crate::config::TlsSettings,
        system: &SystemSettings,
    ) -> Result<Self, SecurityError> {
        Self::new(TrustMaterial::load(tls)?, system)
    }

    /// The certificate-bound identity of this system.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Full subject common name of the leaf certificate.
    #[must_use]
    pub fn common_name(&self) -> &str {
        self.material.common_name()
    }

    /// TLS pieces for the outbound HTTP client role.
    #[must_use]
    pub fn client_tls(&self) -> &ClientTls {
        &self.client_tls
    }

    /// Listener-side TLS configuration requiring verified client
    /// certificates (mutual authentication in both directions).
    #[must_use]
    pub fn server_config(&self) -> Arc<rustls::ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

impl std::fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustContext")
            .field("identity", &self.identity)
            .field("common_name", &self.material.common_name())
            .finish_non_exhaustive()
    }
}

/// First dot-separated label of a common name, e.g.
/// `car-factory.testcloud.company.eu` -> `car-factory`.
fn first_label(common_name: &str) -> &str {
    common_name.split('.').next().unwrap_or(common_name)
}

fn build_client_tls(material: &TrustMaterial) -> Result<ClientTls, SecurityError> {
    let identity = reqwest::Identity::from_pem(material.keystore_pem())
        .map_err(|e| SecurityError::Certificate(format!("keystore rejected by TLS stack: {e}")))?;

    let mut roots = Vec::with_capacity(material.roots().len());
    for der in material.roots() {
        let cert = reqwest::Certificate::from_der(der.as_ref())
            .map_err(|e| SecurityError::Trust(format!("trust anchor rejected: {e}")))?;
        roots.push(cert);
    }

    Ok(ClientTls { identity, roots })
}

fn build_server_config(
    material: &TrustMaterial,
) -> Result<Arc<rustls::ServerConfig>, SecurityError> {
    let mut root_store = RootCertStore::empty();
    for der in material.roots() {
        root_store
            .add(der.clone())
            .map_err(|e| SecurityError::Trust(format!("trust anchor rejected: {e}")))?;
    }

    let verifier = WebPkiClientVerifier::builder(Arc::new(root_store))
        .build()
        .map_err(|e| SecurityError::Trust(format!("cannot build client verifier: {e}")))?;

    let config = rustls::ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(material.chain().to_vec(), material.key())
        .map_err(|e| SecurityError::Certificate(format!("key/chain rejected: {e}")))?;

    Ok(Arc::new(config))
}
